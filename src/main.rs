use clap::Parser;
use miette::Result;
use qtrack::cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Reset SIGPIPE to default behavior (terminate silently) for proper Unix piping.
    // Without this, piping to `head`, `grep -q`, etc. causes a panic on broken pipe.
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;

    let default_level = if global.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("QTRACK_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init(args) => qtrack::cli::commands::init::run(args, &global),
        Commands::Capa(cmd) => qtrack::cli::commands::capa::run(cmd, &global),
        Commands::Cr(cmd) => qtrack::cli::commands::cr::run(cmd, &global),
        Commands::Dev(cmd) => qtrack::cli::commands::dev::run(cmd, &global),
        Commands::Personnel(cmd) => qtrack::cli::commands::personnel::run(cmd, &global),
        Commands::Filter(cmd) => qtrack::cli::commands::filter::run(cmd, &global),
    }
}
