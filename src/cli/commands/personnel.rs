//! `qtrack personnel` command - People CAPA records are assigned to

use clap::Subcommand;
use console::style;
use miette::Result;
use tracing::info;

use crate::cli::helpers::Session;
use crate::cli::table::TableFormatter;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::entities::personnel::NewPersonnel;

#[derive(Subcommand, Debug)]
pub enum PersonnelCommands {
    /// Register a person
    Add(AddArgs),

    /// List registered personnel
    List,
}

#[derive(clap::Args, Debug)]
pub struct AddArgs {
    /// Full name
    pub name: String,

    /// Contact email
    #[arg(long, short = 'e')]
    pub email: Option<String>,
}

/// Run a personnel subcommand
pub fn run(cmd: PersonnelCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        PersonnelCommands::Add(args) => run_add(args, global),
        PersonnelCommands::List => run_list(global),
    }
}

fn run_add(args: AddArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;

    let name = args.name.trim().to_string();
    let id = session.service.add_personnel(NewPersonnel {
        name: name.clone(),
        email: args.email.map(|e| e.trim().to_string()),
    })?;
    info!(%id, "registered personnel");

    if global.format == OutputFormat::Id {
        println!("{}", id);
    } else {
        println!(
            "{} Registered {} as personnel {}",
            style("✓").green(),
            name,
            style(id).cyan()
        );
    }
    Ok(())
}

fn run_list(global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let people = session.service.list_personnel()?;
    TableFormatter::new(global.format)
        .quiet(global.quiet)
        .output(&people)
}
