//! CLI argument definitions using clap derive

use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::commands::{
    capa::CapaCommands, cr::CrCommands, dev::DevCommands, filter::FilterCommands,
    init::InitArgs, personnel::PersonnelCommands,
};
use crate::core::workflow::TransitionPolicy;

#[derive(Parser)]
#[command(name = "qtrack")]
#[command(author, version, about = "CAPA and change request tracking")]
#[command(
    long_about = "Track corrective and preventive actions and change requests through their lifecycles, with linked origins and saved listing views."
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "auto")]
    pub format: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Enable verbose output (debug logging on stderr)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Lifecycle enforcement (overrides config): strict or permissive
    #[arg(long, global = true, env = "QTRACK_POLICY")]
    pub policy: Option<TransitionPolicy>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new qtrack project
    Init(InitArgs),

    /// Corrective/preventive action records
    #[command(subcommand)]
    Capa(CapaCommands),

    /// Change requests
    #[command(subcommand)]
    Cr(CrCommands),

    /// Deviation records referenced by change requests
    #[command(subcommand)]
    Dev(DevCommands),

    /// Personnel assignable to CAPA records
    #[command(subcommand)]
    Personnel(PersonnelCommands),

    /// Saved CAPA listing views
    #[command(subcommand)]
    Filter(FilterCommands),
}

/// Output format for list and show commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table on a terminal, TSV when piped; YAML for show
    #[default]
    Auto,
    /// Bordered table
    Table,
    /// Tab-separated values (for piping)
    Tsv,
    /// JSON format (for programming)
    Json,
    /// YAML format (full fidelity)
    Yaml,
    /// Just IDs, one per line
    Id,
}
