//! `qtrack filter` command - Saved CAPA listing views

use clap::Subcommand;
use console::style;
use miette::Result;
use serde::Serialize;
use tracing::info;

use crate::cli::helpers::{parse_filter_pair, Session};
use crate::cli::table::output_document;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::RecordId;
use crate::core::query::Filters;
use crate::entities::capa::CapaStatus;
use crate::entities::filter_options::{DateRange, FilterPreference, FilterSettings, TriggerSource};

#[derive(Subcommand, Debug)]
pub enum FilterCommands {
    /// Save a listing view for a user
    Save(SaveArgs),

    /// Show a user's latest saved view
    Show(ShowArgs),
}

#[derive(clap::Args, Debug)]
pub struct SaveArgs {
    /// Status to list
    #[arg(long)]
    pub status: Option<CapaStatus>,

    /// Trigger (AUDIT, DEVIATION, MARKET_COMPLAINT, OTHER_QUALITY_PROCESSES)
    #[arg(long)]
    pub trigger: Option<TriggerSource>,

    /// Due-date window as FROM..TO, either side optional
    #[arg(long)]
    pub range: Option<DateRange>,

    /// Extra listing filter KEY=VALUE (repeatable)
    #[arg(long = "filter", value_parser = parse_filter_pair)]
    pub filters: Vec<(String, String)>,

    /// Owner of the view (default from config)
    #[arg(long)]
    pub user: Option<RecordId>,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Owner of the view (default from config)
    #[arg(long)]
    pub user: Option<RecordId>,
}

/// Run a saved-view subcommand
pub fn run(cmd: FilterCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        FilterCommands::Save(args) => run_save(args, global),
        FilterCommands::Show(args) => run_show(args, global),
    }
}

fn settings_from_args(args: &SaveArgs) -> FilterSettings {
    let mut settings = FilterSettings {
        date_range: args.range,
        status: args.status,
        trigger_source: args.trigger,
        last_used_settings: None,
    };
    if !args.filters.is_empty() {
        let extra: Filters = args.filters.iter().cloned().collect();
        settings.remember(&extra);
    }
    settings
}

fn run_save(args: SaveArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let user = session.user_id(args.user)?;

    let settings = settings_from_args(&args);
    let id = session.service.save_filter_preference(user, &settings)?;
    info!(%user, preference = %id, "saved listing view");

    if global.format == OutputFormat::Id {
        println!("{}", id);
    } else {
        println!(
            "{} Saved view {} for user {}",
            style("✓").green(),
            style(id).cyan(),
            user
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct SavedView<'a> {
    #[serde(flatten)]
    preference: &'a FilterPreference,
    filters: Filters,
}

fn run_show(args: ShowArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let user = session.user_id(args.user)?;

    let Some(preference) = session.service.latest_filter_preference(user)? else {
        println!("No saved view for user {}.", user);
        return Ok(());
    };

    if global.format == OutputFormat::Id {
        println!("{}", preference.id);
        return Ok(());
    }

    let filters = preference.settings.to_filters()?;
    output_document(
        &SavedView {
            preference: &preference,
            filters,
        },
        global.format,
    )
}
