//! Table formatting utilities for CLI list commands
//!
//! Every listable record describes itself as a [`TableRow`] through
//! [`Tabular`]; [`TableFormatter`] renders those rows in the requested
//! [`OutputFormat`].

use chrono::NaiveDate;
use console::{style, Term};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tabled::{builder::Builder, settings::Style};

use crate::cli::helpers::truncate_str;
use crate::cli::OutputFormat;
use crate::core::identity::RecordId;
use crate::core::links::OriginRef;
use crate::entities::{CapaRecord, ChangeRequest, DeviationRecord, Personnel};

/// Widest a free-text cell gets in table output
const TEXT_WIDTH: usize = 40;

/// A typed cell value
#[derive(Debug, Clone)]
pub enum CellValue {
    Id(RecordId),
    /// Free text, truncated in tables
    Text(String),
    /// Fixed vocabulary token (status, source, area)
    Token(&'static str),
    Date(NaiveDate),
    OptionalDate(Option<NaiveDate>),
    Origin(OriginRef),
    Empty,
}

impl CellValue {
    /// Full value, used for TSV output
    pub fn raw(&self) -> String {
        match self {
            CellValue::Id(id) => id.to_string(),
            CellValue::Text(s) => s.replace(['\t', '\n'], " "),
            CellValue::Token(t) => t.to_string(),
            CellValue::Date(d) => d.to_string(),
            CellValue::OptionalDate(d) => d.map(|d| d.to_string()).unwrap_or_default(),
            CellValue::Origin(origin) => match origin {
                OriginRef::Deviation(id) => format!("DEV-{}", id),
                OriginRef::Capa(id) => format!("CAPA-{}", id),
                OriginRef::None => String::new(),
            },
            CellValue::Empty => String::new(),
        }
    }

    /// Value as shown in a bordered table
    pub fn display(&self) -> String {
        match self {
            CellValue::Text(_) => truncate_str(&self.raw(), TEXT_WIDTH),
            CellValue::OptionalDate(None) | CellValue::Origin(OriginRef::None) | CellValue::Empty => {
                "-".to_string()
            }
            _ => self.raw(),
        }
    }
}

/// Column definition with header label
#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub key: &'static str,
    pub header: &'static str,
}

impl ColumnDef {
    pub const fn new(key: &'static str, header: &'static str) -> Self {
        Self { key, header }
    }
}

/// A row of cell values for table output
pub struct TableRow {
    pub id: RecordId,
    pub cells: Vec<(&'static str, CellValue)>,
}

impl TableRow {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            cells: Vec::new(),
        }
    }

    pub fn cell(mut self, key: &'static str, value: CellValue) -> Self {
        self.cells.push((key, value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&CellValue> {
        self.cells.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

/// A record that can be listed
pub trait Tabular: Serialize {
    const COLUMNS: &'static [ColumnDef];

    /// Singular noun used in the summary line
    const NOUN: &'static str;

    fn row(&self) -> TableRow;
}

impl Tabular for CapaRecord {
    const COLUMNS: &'static [ColumnDef] = &[
        ColumnDef::new("id", "ID"),
        ColumnDef::new("status", "STATUS"),
        ColumnDef::new("source", "SOURCE"),
        ColumnDef::new("description", "DESCRIPTION"),
        ColumnDef::new("assignee", "ASSIGNEE"),
        ColumnDef::new("due", "DUE"),
        ColumnDef::new("completed", "COMPLETED"),
    ];
    const NOUN: &'static str = "CAPA record";

    fn row(&self) -> TableRow {
        TableRow::new(self.id)
            .cell("id", CellValue::Id(self.id))
            .cell("status", CellValue::Token(self.capa_status.as_str()))
            .cell("source", CellValue::Token(self.capa_source.as_str()))
            .cell("description", CellValue::Text(self.issue_description.clone()))
            .cell("assignee", CellValue::Id(self.assigned_personnel_id))
            .cell("due", CellValue::Date(self.due_date))
            .cell("completed", CellValue::OptionalDate(self.completion_date))
    }
}

impl Tabular for ChangeRequest {
    const COLUMNS: &'static [ColumnDef] = &[
        ColumnDef::new("id", "ID"),
        ColumnDef::new("number", "NUMBER"),
        ColumnDef::new("status", "STATUS"),
        ColumnDef::new("area", "AREA"),
        ColumnDef::new("reason", "REASON"),
        ColumnDef::new("origin", "ORIGIN"),
        ColumnDef::new("submitted", "SUBMITTED"),
    ];
    const NOUN: &'static str = "change request";

    fn row(&self) -> TableRow {
        let details = &self.details;
        TableRow::new(self.id)
            .cell("id", CellValue::Id(self.id))
            .cell("number", CellValue::Text(self.change_request_number.clone()))
            .cell("status", CellValue::Token(details.change_request_status.as_str()))
            .cell("area", CellValue::Token(details.areas_affected.as_str()))
            .cell("reason", CellValue::Text(details.reason_for_change.clone()))
            .cell("origin", CellValue::Origin(self.origin))
            .cell("submitted", CellValue::Date(details.submission_date))
    }
}

impl Tabular for Personnel {
    const COLUMNS: &'static [ColumnDef] = &[
        ColumnDef::new("id", "ID"),
        ColumnDef::new("name", "NAME"),
        ColumnDef::new("email", "EMAIL"),
    ];
    const NOUN: &'static str = "person";

    fn row(&self) -> TableRow {
        TableRow::new(self.id)
            .cell("id", CellValue::Id(self.id))
            .cell("name", CellValue::Text(self.name.clone()))
            .cell(
                "email",
                self.email
                    .clone()
                    .map_or(CellValue::Empty, CellValue::Text),
            )
    }
}

impl Tabular for DeviationRecord {
    const COLUMNS: &'static [ColumnDef] = &[
        ColumnDef::new("id", "ID"),
        ColumnDef::new("number", "NUMBER"),
        ColumnDef::new("description", "DESCRIPTION"),
        ColumnDef::new("reported", "REPORTED"),
    ];
    const NOUN: &'static str = "deviation";

    fn row(&self) -> TableRow {
        TableRow::new(self.id)
            .cell("id", CellValue::Id(self.id))
            .cell("number", CellValue::Text(self.deviation_number.clone()))
            .cell("description", CellValue::Text(self.description.clone()))
            .cell("reported", CellValue::Date(self.reported_on))
    }
}

/// Resolve `Auto` for listings: a table on a terminal, TSV otherwise
pub fn list_format(format: OutputFormat) -> OutputFormat {
    match format {
        OutputFormat::Auto if Term::stdout().is_term() => OutputFormat::Table,
        OutputFormat::Auto => OutputFormat::Tsv,
        other => other,
    }
}

/// Renders listings in one output format
pub struct TableFormatter {
    format: OutputFormat,
    show_summary: bool,
}

impl TableFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format: list_format(format),
            show_summary: true,
        }
    }

    /// Drop the trailing "N record(s) found" line
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.show_summary = !quiet;
        self
    }

    pub fn output<T: Tabular>(&self, records: &[T]) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(records).into_diagnostic()?);
            }
            OutputFormat::Yaml => {
                print!("{}", serde_yml::to_string(records).into_diagnostic()?);
            }
            OutputFormat::Id => {
                for record in records {
                    println!("{}", record.row().id);
                }
            }
            OutputFormat::Tsv => self.output_tsv::<T>(records),
            OutputFormat::Table | OutputFormat::Auto => self.output_table::<T>(records),
        }
        Ok(())
    }

    fn output_tsv<T: Tabular>(&self, records: &[T]) {
        let header: Vec<&str> = T::COLUMNS.iter().map(|c| c.header).collect();
        println!("{}", header.join("\t"));

        for record in records {
            let row = record.row();
            let cells: Vec<String> = T::COLUMNS
                .iter()
                .map(|col| row.get(col.key).map(CellValue::raw).unwrap_or_default())
                .collect();
            println!("{}", cells.join("\t"));
        }
    }

    fn output_table<T: Tabular>(&self, records: &[T]) {
        if records.is_empty() {
            println!("No {}s found.", T::NOUN);
            return;
        }

        let mut builder = Builder::default();
        builder.push_record(T::COLUMNS.iter().map(|c| c.header));
        for record in records {
            let row = record.row();
            builder.push_record(T::COLUMNS.iter().map(|col| {
                row.get(col.key)
                    .map(CellValue::display)
                    .unwrap_or_else(|| "-".to_string())
            }));
        }
        println!("{}", builder.build().with(Style::rounded()));

        if self.show_summary {
            println!();
            println!("{} {}(s) found.", style(records.len()).cyan(), T::NOUN);
        }
    }
}

/// Print a single document; everything but JSON renders as YAML
pub fn output_document<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
        }
        _ => print!("{}", serde_yml::to_string(value).into_diagnostic()?),
    }
    Ok(())
}
