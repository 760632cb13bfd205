//! `qtrack init` command - Initialize a new qtrack project

use console::style;
use miette::{IntoDiagnostic, Result};
use tracing::info;

use crate::cli::helpers::Session;
use crate::cli::GlobalOpts;
use crate::core::project::{Project, ProjectError};

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (default: current directory)
    #[arg(default_value = ".")]
    pub path: std::path::PathBuf,
}

pub fn run(args: InitArgs, global: &GlobalOpts) -> Result<()> {
    let path = if args.path.as_os_str() == "." {
        std::env::current_dir().into_diagnostic()?
    } else {
        args.path.clone()
    };

    let project = match Project::init(&path) {
        Ok(project) => project,
        Err(ProjectError::AlreadyExists(path)) => {
            println!(
                "{} qtrack project already exists at {}",
                style("!").yellow(),
                style(path.display()).cyan()
            );
            return Ok(());
        }
        Err(e) => return Err(miette::miette!("{}", e)),
    };

    // Opening the store creates the database and its schema
    let session = Session::open_project(project, global)?;
    let database = session.config.database_path(&session.project);
    info!(root = %session.project.root().display(), "initialized project");

    println!(
        "{} Initialized qtrack project at {}",
        style("✓").green(),
        style(session.project.root().display()).cyan()
    );

    if !global.quiet {
        println!("  database: {}", style(database.display()).dim());
        println!();
        println!("Next steps:");
        println!(
            "  {} Register someone to assign CAPAs to",
            style("qtrack personnel add \"Dana Reyes\"").yellow()
        );
        println!(
            "  {} Open your first CAPA",
            style("qtrack capa new --description ... --source audit --personnel 1 --due 2025-12-31")
                .yellow()
        );
    }

    Ok(())
}
