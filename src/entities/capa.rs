//! CAPA entity type - Corrective and Preventive Actions

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::entity::normalize_token;
use crate::core::identity::RecordId;

/// What triggered the CAPA. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapaSource {
    Deviations,
    AuditFindings,
    OtherQualityProcesses,
}

impl CapaSource {
    /// Stored names of every source
    pub const NAMES: &'static [&'static str] =
        &["DEVIATIONS", "AUDIT_FINDINGS", "OTHER_QUALITY_PROCESSES"];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapaSource::Deviations => "DEVIATIONS",
            CapaSource::AuditFindings => "AUDIT_FINDINGS",
            CapaSource::OtherQualityProcesses => "OTHER_QUALITY_PROCESSES",
        }
    }
}

impl std::fmt::Display for CapaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CapaSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "DEVIATIONS" | "DEVIATION" => Ok(CapaSource::Deviations),
            "AUDIT_FINDINGS" | "AUDIT" => Ok(CapaSource::AuditFindings),
            "OTHER_QUALITY_PROCESSES" | "OTHER" => Ok(CapaSource::OtherQualityProcesses),
            _ => Err(format!(
                "Invalid CAPA source: {}. Use DEVIATIONS, AUDIT_FINDINGS, or OTHER_QUALITY_PROCESSES",
                s
            )),
        }
    }
}

/// CAPA lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapaStatus {
    #[default]
    Open,
    UnderReview,
    Approved,
    Closed,
}

impl CapaStatus {
    pub const NAMES: &'static [&'static str] = &["OPEN", "UNDER_REVIEW", "APPROVED", "CLOSED"];

    pub const ALL: &'static [CapaStatus] = &[
        CapaStatus::Open,
        CapaStatus::UnderReview,
        CapaStatus::Approved,
        CapaStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapaStatus::Open => "OPEN",
            CapaStatus::UnderReview => "UNDER_REVIEW",
            CapaStatus::Approved => "APPROVED",
            CapaStatus::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for CapaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CapaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "OPEN" => Ok(CapaStatus::Open),
            "UNDER_REVIEW" | "REVIEW" => Ok(CapaStatus::UnderReview),
            "APPROVED" => Ok(CapaStatus::Approved),
            "CLOSED" => Ok(CapaStatus::Closed),
            _ => Err(format!(
                "Invalid CAPA status: {}. Use OPEN, UNDER_REVIEW, APPROVED, or CLOSED",
                s
            )),
        }
    }
}

/// A stored CAPA record (value snapshot of one row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapaRecord {
    /// Store-assigned identifier
    pub id: RecordId,

    /// The issue or non-conformity requiring action
    pub issue_description: String,

    /// Trigger classification
    pub capa_source: CapaSource,

    /// Proposed corrective and preventive measures
    #[serde(default)]
    pub proposed_actions: String,

    /// Lifecycle state
    pub capa_status: CapaStatus,

    /// Responsible staff member (weak reference)
    pub assigned_personnel_id: RecordId,

    /// Target completion date
    pub due_date: NaiveDate,

    /// Actual completion date, set on or after closure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<NaiveDate>,

    /// Date the record was opened
    pub opened_on: NaiveDate,

    /// Write counter used for compare-and-swap updates
    pub version: u32,
}

/// Field values for a CAPA record that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCapaRecord {
    pub issue_description: String,
    pub capa_source: CapaSource,
    pub proposed_actions: String,
    pub capa_status: CapaStatus,
    pub assigned_personnel_id: RecordId,
    pub due_date: NaiveDate,
    pub completion_date: Option<NaiveDate>,
    pub opened_on: NaiveDate,
}

impl NewCapaRecord {
    /// Create an OPEN record, opened today, with no proposed actions yet
    pub fn new(
        issue_description: impl Into<String>,
        capa_source: CapaSource,
        assigned_personnel_id: RecordId,
        due_date: NaiveDate,
    ) -> Self {
        Self {
            issue_description: issue_description.into(),
            capa_source,
            proposed_actions: String::new(),
            capa_status: CapaStatus::Open,
            assigned_personnel_id,
            due_date,
            completion_date: None,
            opened_on: chrono::Local::now().date_naive(),
        }
    }
}

/// Sparse update of a CAPA record's mutable fields.
///
/// `capa_source` and `opened_on` are immutable and therefore absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapaPatch {
    pub issue_description: Option<String>,
    pub proposed_actions: Option<String>,
    pub capa_status: Option<CapaStatus>,
    pub assigned_personnel_id: Option<RecordId>,
    pub due_date: Option<NaiveDate>,
    /// `Some(None)` clears the stored date
    pub completion_date: Option<Option<NaiveDate>>,
}

impl CapaPatch {
    /// True when the patch changes nothing
    pub fn is_empty(&self) -> bool {
        *self == CapaPatch::default()
    }

    /// Overlay the patch on a record. Status legality is checked by the caller.
    pub fn apply_to(self, record: &mut CapaRecord) {
        if let Some(text) = self.issue_description {
            record.issue_description = text;
        }
        if let Some(text) = self.proposed_actions {
            record.proposed_actions = text;
        }
        if let Some(status) = self.capa_status {
            record.capa_status = status;
        }
        if let Some(person) = self.assigned_personnel_id {
            record.assigned_personnel_id = person;
        }
        if let Some(due) = self.due_date {
            record.due_date = due;
        }
        if let Some(done) = self.completion_date {
            record.completion_date = done;
        }
    }
}
