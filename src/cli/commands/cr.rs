//! `qtrack cr` command - Change request management

use chrono::NaiveDate;
use clap::Subcommand;
use console::style;
use miette::Result;
use tracing::{info, warn};

use crate::cli::helpers::{parse_filter_pair, today, Session};
use crate::cli::table::{output_document, TableFormatter};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::RecordId;
use crate::core::links::OriginRef;
use crate::core::query::{Filters, SortKey};
use crate::entities::change_request::{
    AreaAffected, ChangeRequestDetails, ChangeRequestStatus, NewChangeRequest,
};

#[derive(Subcommand, Debug)]
pub enum CrCommands {
    /// List change requests
    List(ListArgs),

    /// Submit a new change request
    New(NewArgs),

    /// Show a change request
    Show(ShowArgs),

    /// Move a change request to another status
    Transition(TransitionArgs),

    /// Link a change request to its originating deviation or CAPA
    Attach(AttachArgs),

    /// List the change requests triggered by a deviation or CAPA
    Origin(OriginArgs),
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Filter by status
    #[arg(long)]
    pub status: Option<ChangeRequestStatus>,

    /// Filter by affected area
    #[arg(long)]
    pub area: Option<AreaAffected>,

    /// Submitted on or after this date
    #[arg(long)]
    pub submitted_from: Option<NaiveDate>,

    /// Submitted on or before this date
    #[arg(long)]
    pub submitted_to: Option<NaiveDate>,

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
}

#[derive(clap::Args, Debug)]
pub struct NewArgs {
    /// Why the change is needed (required)
    #[arg(long, short = 'r')]
    pub reason: String,

    /// Affected area (OPERATIONS, QUALITY_CONTROL, PRODUCTION, SUPPLY_CHAIN)
    #[arg(long)]
    pub area: AreaAffected,

    /// Submission date (default: today)
    #[arg(long)]
    pub submitted: Option<NaiveDate>,

    /// Change request number (default: generated CR-YYYY-NNNN)
    #[arg(long)]
    pub number: Option<String>,

    /// Expected impact of the change
    #[arg(long)]
    pub impact: Option<String>,

    /// Proposed actions
    #[arg(long, short = 'a')]
    pub actions: Option<String>,

    /// Originating deviation ID
    #[arg(long, conflicts_with = "capa")]
    pub deviation: Option<RecordId>,

    /// Originating CAPA record ID
    #[arg(long)]
    pub capa: Option<RecordId>,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Change request ID
    pub id: RecordId,
}

#[derive(clap::Args, Debug)]
pub struct TransitionArgs {
    /// Change request ID
    pub id: RecordId,

    /// Target status
    pub status: ChangeRequestStatus,

    /// Evaluation or implementation date (default: today)
    #[arg(long)]
    pub on: Option<NaiveDate>,

    /// Fail unless the stored version matches
    #[arg(long)]
    pub expect_version: Option<u32>,
}

#[derive(clap::Args, Debug)]
pub struct AttachArgs {
    /// Change request ID
    pub id: RecordId,

    /// Originating deviation ID
    #[arg(long, conflicts_with = "capa")]
    pub deviation: Option<RecordId>,

    /// Originating CAPA record ID
    #[arg(long)]
    pub capa: Option<RecordId>,

    /// Fail unless the stored version matches
    #[arg(long)]
    pub expect_version: Option<u32>,
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
pub struct OriginArgs {
    /// Deviation ID
    #[arg(long)]
    pub deviation: Option<RecordId>,

    /// CAPA record ID
    #[arg(long)]
    pub capa: Option<RecordId>,
}

/// Run a change request subcommand
pub fn run(cmd: CrCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        CrCommands::List(args) => run_list(args, global),
        CrCommands::New(args) => run_new(args, global),
        CrCommands::Show(args) => run_show(args, global),
        CrCommands::Transition(args) => run_transition(args, global),
        CrCommands::Attach(args) => run_attach(args, global),
        CrCommands::Origin(args) => run_origin(args, global),
    }
}

fn collect_filters(args: &ListArgs) -> Filters {
    let mut filters: Filters = args.filters.iter().cloned().collect();
    if let Some(status) = args.status {
        filters.insert("change_request_status".to_string(), status.as_str().to_string());
    }
    if let Some(area) = args.area {
        filters.insert("areas_affected".to_string(), area.as_str().to_string());
    }
    if let Some(from) = args.submitted_from {
        filters.insert("submission_date_from".to_string(), from.to_string());
    }
    if let Some(to) = args.submitted_to {
        filters.insert("submission_date_to".to_string(), to.to_string());
    }
    filters
}

fn run_list(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let filters = collect_filters(&args);
    let page = session.page(args.page, args.page_size, args.sort);

    let requests = session.service.list_change_requests(&filters, &page)?;
    TableFormatter::new(global.format)
        .quiet(global.quiet)
        .output(&requests)
}

fn run_new(args: NewArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;

    let submitted = args.submitted.unwrap_or_else(today);
    let mut details = ChangeRequestDetails::submitted(submitted, args.area, args.reason);
    if let Some(impact) = args.impact {
        details.expected_impact = impact;
    }
    if let Some(actions) = args.actions {
        details.proposed_actions = actions;
    }

    let mut request = NewChangeRequest::new(details);
    request.change_request_number = args.number;
    request.deviation_id = args.deviation;
    request.capa_id = args.capa;

    let id = session.service.create_change_request(request)?;
    let created = session.service.get_change_request(id)?;
    info!(%id, number = %created.change_request_number, "created change request");

    if global.format == OutputFormat::Id {
        println!("{}", id);
    } else {
        println!(
            "{} Created change request {} ({})",
            style("✓").green(),
            style(id).cyan(),
            created.change_request_number
        );
    }
    Ok(())
}

fn run_show(args: ShowArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let request = session.service.get_change_request(args.id)?;

    if global.format == OutputFormat::Id {
        println!("{}", request.id);
        Ok(())
    } else {
        output_document(&request, global.format)
    }
}

fn run_transition(args: TransitionArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let from = session
        .service
        .get_change_request(args.id)?
        .details
        .change_request_status;

    let effective = args.on.unwrap_or_else(today);
    let request = session.service.transition_change_request_status(
        args.id,
        args.status,
        effective,
        args.expect_version,
    )?;
    let status = request.details.change_request_status;
    if from != status && !session.service.engine().is_valid_transition(from, status) {
        warn!(id = %request.id, %from, to = %status, "status move outside the change request lifecycle");
    }
    info!(id = %request.id, %status, "transitioned change request");

    println!(
        "{} Change request {} is now {}",
        style("✓").green(),
        style(&request.change_request_number).cyan(),
        style(status).yellow()
    );
    Ok(())
}

fn run_attach(args: AttachArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;

    let request = session.service.attach_change_request(
        args.id,
        args.deviation,
        args.capa,
        args.expect_version,
    )?;
    info!(id = %request.id, origin = ?request.origin, "attached change request");

    let target = match request.origin {
        OriginRef::Deviation(id) => format!("deviation {}", id),
        OriginRef::Capa(id) => format!("CAPA record {}", id),
        OriginRef::None => "no origin".to_string(),
    };
    println!(
        "{} Change request {} now points at {}",
        style("✓").green(),
        style(&request.change_request_number).cyan(),
        target
    );
    Ok(())
}

fn run_origin(args: OriginArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;

    let requests = match (args.deviation, args.capa) {
        (Some(deviation), _) => session.service.change_requests_for_deviation(deviation)?,
        (None, Some(capa)) => session.service.change_requests_for_capa(capa)?,
        (None, None) => return Err(miette::miette!("pass --deviation or --capa")),
    };

    TableFormatter::new(global.format)
        .quiet(global.quiet)
        .output(&requests)
}
