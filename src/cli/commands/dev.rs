//! `qtrack dev` command - Deviation records referenced by change requests

use chrono::NaiveDate;
use clap::Subcommand;
use console::style;
use miette::Result;
use tracing::info;

use crate::cli::helpers::{today, Session};
use crate::cli::table::TableFormatter;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::entities::deviation::NewDeviation;

#[derive(Subcommand, Debug)]
pub enum DevCommands {
    /// Record a deviation
    New(NewArgs),

    /// List deviations
    List,
}

#[derive(clap::Args, Debug)]
pub struct NewArgs {
    /// Deviation number (unique, e.g. DEV-2025-014)
    pub number: String,

    /// What deviated
    #[arg(long, short = 'd')]
    pub description: String,

    /// Date reported (default: today)
    #[arg(long)]
    pub reported: Option<NaiveDate>,
}

/// Run a deviation subcommand
pub fn run(cmd: DevCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        DevCommands::New(args) => run_new(args, global),
        DevCommands::List => run_list(global),
    }
}

fn run_new(args: NewArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;

    let id = session.service.add_deviation(NewDeviation {
        deviation_number: args.number.trim().to_string(),
        description: args.description,
        reported_on: args.reported.unwrap_or_else(today),
    })?;
    info!(%id, number = %args.number, "recorded deviation");

    if global.format == OutputFormat::Id {
        println!("{}", id);
    } else {
        println!(
            "{} Recorded deviation {} ({})",
            style("✓").green(),
            style(id).cyan(),
            args.number.trim()
        );
    }
    Ok(())
}

fn run_list(global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let deviations = session.service.list_deviations()?;
    TableFormatter::new(global.format)
        .quiet(global.quiet)
        .output(&deviations)
}
