//! `qtrack capa` command - Corrective/Preventive Action management

use std::ops::ControlFlow;

use chrono::NaiveDate;
use clap::Subcommand;
use console::style;
use miette::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cli::helpers::{parse_filter_pair, today, Session};
use crate::cli::table::{output_document, TableFormatter};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::RecordId;
use crate::core::query::{Filters, SortKey};
use crate::entities::capa::{CapaPatch, CapaRecord, CapaSource, CapaStatus, NewCapaRecord};

#[derive(Subcommand, Debug)]
pub enum CapaCommands {
    /// List CAPA records with filtering and paging
    List(ListArgs),

    /// Open a new CAPA record
    New(NewArgs),

    /// Show a CAPA record
    Show(ShowArgs),

    /// Change fields of a CAPA record
    Update(UpdateArgs),

    /// Move a CAPA record to another status
    Transition(TransitionArgs),
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Filter by status (OPEN, UNDER_REVIEW, APPROVED, CLOSED)
    #[arg(long)]
    pub status: Option<CapaStatus>,

    /// Filter by source (DEVIATIONS, AUDIT_FINDINGS, OTHER_QUALITY_PROCESSES)
    #[arg(long, short = 's')]
    pub source: Option<CapaSource>,

    /// Filter by assigned personnel ID
    #[arg(long, short = 'p')]
    pub personnel: Option<RecordId>,

    /// Due on or after this date
    #[arg(long)]
    pub due_from: Option<NaiveDate>,

    /// Due on or before this date
    #[arg(long)]
    pub due_to: Option<NaiveDate>,

    /// Completed on or after this date
    #[arg(long)]
    pub completed_from: Option<NaiveDate>,

    /// Completed on or before this date
    #[arg(long)]
    pub completed_to: Option<NaiveDate>,

    /// Raw filter KEY=VALUE (repeatable)
    #[arg(long = "filter", value_parser = parse_filter_pair)]
    pub filters: Vec<(String, String)>,

    /// Page number, starting at 1
    #[arg(long, default_value_t = 1)]
    pub page: i64,

    /// Records per page (default from config)
    #[arg(long, short = 'n')]
    pub page_size: Option<i64>,

    /// Sort as FIELD[:asc|:desc]
    #[arg(long, default_value = "id:asc")]
    pub sort: SortKey,

    /// Start from the user's saved view
    #[arg(long)]
    pub saved: bool,

    /// Remember the applied filters in the user's saved view
    #[arg(long)]
    pub remember: bool,

    /// User owning the saved view (default from config)
    #[arg(long)]
    pub user: Option<RecordId>,

    /// Show only the number of records on the page
    #[arg(long)]
    pub count: bool,
}

#[derive(clap::Args, Debug)]
pub struct NewArgs {
    /// Description of the issue (required)
    #[arg(long, short = 'd')]
    pub description: String,

    /// What triggered the CAPA
    #[arg(long, short = 's')]
    pub source: CapaSource,

    /// ID of the responsible person
    #[arg(long, short = 'p')]
    pub personnel: RecordId,

    /// Due date (YYYY-MM-DD)
    #[arg(long)]
    pub due: NaiveDate,

    /// Proposed corrective or preventive actions
    #[arg(long, short = 'a')]
    pub actions: Option<String>,

    /// Initial status (strict policy only accepts OPEN)
    #[arg(long)]
    pub status: Option<CapaStatus>,

    /// Completion date, for records created CLOSED
    #[arg(long)]
    pub completed: Option<NaiveDate>,

    /// Date the record was opened (default: today)
    #[arg(long)]
    pub opened: Option<NaiveDate>,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// CAPA record ID
    pub id: RecordId,

    /// Include the change requests this CAPA triggered
    #[arg(long)]
    pub links: bool,
}

#[derive(clap::Args, Debug)]
pub struct UpdateArgs {
    /// CAPA record ID
    pub id: RecordId,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    #[arg(long, short = 'a')]
    pub actions: Option<String>,

    /// New status, checked like a transition
    #[arg(long)]
    pub status: Option<CapaStatus>,

    #[arg(long, short = 'p')]
    pub personnel: Option<RecordId>,

    #[arg(long)]
    pub due: Option<NaiveDate>,

    #[arg(long)]
    pub completed: Option<NaiveDate>,

    /// Remove the stored completion date
    #[arg(long, conflicts_with = "completed")]
    pub clear_completed: bool,

    /// Fail unless the stored version matches
    #[arg(long)]
    pub expect_version: Option<u32>,
}

#[derive(clap::Args, Debug)]
pub struct TransitionArgs {
    /// CAPA record ID
    pub id: RecordId,

    /// Target status
    pub status: CapaStatus,

    /// Completion date when closing (default: the stored date, else today)
    #[arg(long)]
    pub completed: Option<NaiveDate>,

    /// Fail unless the stored version matches
    #[arg(long)]
    pub expect_version: Option<u32>,
}

/// Run a CAPA subcommand
pub fn run(cmd: CapaCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        CapaCommands::List(args) => run_list(args, global),
        CapaCommands::New(args) => run_new(args, global),
        CapaCommands::Show(args) => run_show(args, global),
        CapaCommands::Update(args) => run_update(args, global),
        CapaCommands::Transition(args) => run_transition(args, global),
    }
}

/// Saved view first, then raw `--filter` pairs, then the dedicated flags
fn collect_filters(args: &ListArgs, saved: Option<Filters>) -> Filters {
    let mut filters = saved.unwrap_or_default();
    filters.extend(args.filters.iter().cloned());

    let mut set = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            filters.insert(key.to_string(), value);
        }
    };
    set("capa_status", args.status.map(|s| s.as_str().to_string()));
    set("capa_source", args.source.map(|s| s.as_str().to_string()));
    set("assigned_personnel_id", args.personnel.map(|p| p.to_string()));
    set("due_date_from", args.due_from.map(|d| d.to_string()));
    set("due_date_to", args.due_to.map(|d| d.to_string()));
    set("completion_date_from", args.completed_from.map(|d| d.to_string()));
    set("completion_date_to", args.completed_to.map(|d| d.to_string()));

    filters
}

fn run_list(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let service = &session.service;

    let saved = if args.saved {
        let user = session.user_id(args.user)?;
        let saved = service.saved_filters(user)?;
        if saved.is_none() {
            debug!(%user, "no saved view, listing without one");
        }
        saved
    } else {
        None
    };

    let filters = collect_filters(&args, saved);
    let page = session.page(args.page, args.page_size, args.sort.clone());
    debug!(?filters, page = page.page, size = page.page_size, sort = %page.sort, "listing CAPA records");

    if args.count {
        let mut count = 0usize;
        service.for_each_capa_record(&filters, &page, |_| {
            count += 1;
            ControlFlow::Continue(())
        })?;
        println!("{}", count);
    } else {
        let records = service.list_capa_records(&filters, &page)?;
        TableFormatter::new(global.format)
            .quiet(global.quiet)
            .output(&records)?;
    }

    if args.remember {
        let user = session.user_id(args.user)?;
        let mut settings = service
            .latest_filter_preference(user)?
            .map(|pref| pref.settings)
            .unwrap_or_default();
        settings.remember_applied(&filters);
        let id = service.save_filter_preference(user, &settings)?;
        info!(%user, preference = %id, "remembered listing filters");
    }

    Ok(())
}

fn run_new(args: NewArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;

    let mut record = NewCapaRecord::new(args.description, args.source, args.personnel, args.due);
    if let Some(actions) = args.actions {
        record.proposed_actions = actions;
    }
    if let Some(status) = args.status {
        record.capa_status = status;
    }
    if let Some(opened) = args.opened {
        record.opened_on = opened;
    }
    record.completion_date = args.completed;

    let id = session.service.create_capa_record(record)?;
    info!(%id, "created CAPA record");

    if global.format == OutputFormat::Id {
        println!("{}", id);
    } else {
        println!(
            "{} Created CAPA record {}",
            style("✓").green(),
            style(id).cyan()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct CapaWithLinks<'a> {
    #[serde(flatten)]
    record: &'a CapaRecord,
    change_requests: Vec<String>,
}

fn run_show(args: ShowArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let record = session.service.get_capa_record(args.id)?;

    if global.format == OutputFormat::Id {
        println!("{}", record.id);
        return Ok(());
    }

    if args.links {
        let change_requests = session
            .service
            .change_requests_for_capa(record.id)?
            .into_iter()
            .map(|cr| cr.change_request_number)
            .collect();
        output_document(
            &CapaWithLinks {
                record: &record,
                change_requests,
            },
            global.format,
        )
    } else {
        output_document(&record, global.format)
    }
}

fn run_update(args: UpdateArgs, global: &GlobalOpts) -> Result<()> {
    let patch = CapaPatch {
        issue_description: args.description,
        proposed_actions: args.actions,
        capa_status: args.status,
        assigned_personnel_id: args.personnel,
        due_date: args.due,
        completion_date: if args.clear_completed {
            Some(None)
        } else {
            args.completed.map(Some)
        },
    };
    if patch.is_empty() {
        return Err(miette::miette!(
            help = "pass at least one of --description, --actions, --status, --personnel, --due, --completed, --clear-completed",
            "nothing to update"
        ));
    }

    let session = Session::open(global)?;
    let record = session
        .service
        .update_capa_record(args.id, patch, args.expect_version)?;
    info!(id = %record.id, version = record.version, "updated CAPA record");

    println!(
        "{} Updated CAPA record {} ({}, version {})",
        style("✓").green(),
        style(record.id).cyan(),
        record.capa_status,
        record.version
    );
    Ok(())
}

fn run_transition(args: TransitionArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let current = session.service.get_capa_record(args.id)?;
    let from = current.capa_status;

    // A stored completion date is kept unless --completed replaces it
    let completed = args.completed.or_else(|| {
        (args.status == CapaStatus::Closed && current.completion_date.is_none()).then(today)
    });
    let record = session.service.transition_capa_status(
        args.id,
        args.status,
        completed,
        args.expect_version,
    )?;
    if from != record.capa_status
        && !session.service.engine().is_valid_transition(from, record.capa_status)
    {
        warn!(id = %record.id, %from, to = %record.capa_status, "status move outside the CAPA lifecycle");
    }
    info!(id = %record.id, status = %record.capa_status, "transitioned CAPA record");

    println!(
        "{} CAPA record {} is now {}",
        style("✓").green(),
        style(record.id).cyan(),
        style(record.capa_status).yellow()
    );
    Ok(())
}
