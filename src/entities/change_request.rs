//! Change request entity type
//!
//! A change request proposes an operational or process change. It may be
//! triggered by a CAPA record or a deviation record, never both.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::entity::normalize_token;
use crate::core::identity::RecordId;
use crate::core::links::OriginRef;

/// Change request lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeRequestStatus {
    #[default]
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Implemented,
}

impl ChangeRequestStatus {
    pub const NAMES: &'static [&'static str] = &[
        "SUBMITTED",
        "UNDER_REVIEW",
        "APPROVED",
        "REJECTED",
        "IMPLEMENTED",
    ];

    pub const ALL: &'static [ChangeRequestStatus] = &[
        ChangeRequestStatus::Submitted,
        ChangeRequestStatus::UnderReview,
        ChangeRequestStatus::Approved,
        ChangeRequestStatus::Rejected,
        ChangeRequestStatus::Implemented,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeRequestStatus::Submitted => "SUBMITTED",
            ChangeRequestStatus::UnderReview => "UNDER_REVIEW",
            ChangeRequestStatus::Approved => "APPROVED",
            ChangeRequestStatus::Rejected => "REJECTED",
            ChangeRequestStatus::Implemented => "IMPLEMENTED",
        }
    }
}

impl std::fmt::Display for ChangeRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "SUBMITTED" => Ok(ChangeRequestStatus::Submitted),
            "UNDER_REVIEW" | "REVIEW" => Ok(ChangeRequestStatus::UnderReview),
            "APPROVED" => Ok(ChangeRequestStatus::Approved),
            "REJECTED" => Ok(ChangeRequestStatus::Rejected),
            "IMPLEMENTED" => Ok(ChangeRequestStatus::Implemented),
            _ => Err(format!(
                "Invalid change request status: {}. Use SUBMITTED, UNDER_REVIEW, APPROVED, REJECTED, or IMPLEMENTED",
                s
            )),
        }
    }
}

/// Operational area touched by a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AreaAffected {
    Operations,
    QualityControl,
    Production,
    SupplyChain,
}

impl AreaAffected {
    pub const NAMES: &'static [&'static str] =
        &["OPERATIONS", "QUALITY_CONTROL", "PRODUCTION", "SUPPLY_CHAIN"];

    pub fn as_str(&self) -> &'static str {
        match self {
            AreaAffected::Operations => "OPERATIONS",
            AreaAffected::QualityControl => "QUALITY_CONTROL",
            AreaAffected::Production => "PRODUCTION",
            AreaAffected::SupplyChain => "SUPPLY_CHAIN",
        }
    }
}

impl std::fmt::Display for AreaAffected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AreaAffected {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "OPERATIONS" => Ok(AreaAffected::Operations),
            "QUALITY_CONTROL" | "QC" => Ok(AreaAffected::QualityControl),
            "PRODUCTION" => Ok(AreaAffected::Production),
            "SUPPLY_CHAIN" => Ok(AreaAffected::SupplyChain),
            _ => Err(format!(
                "Invalid area: {}. Use OPERATIONS, QUALITY_CONTROL, PRODUCTION, or SUPPLY_CHAIN",
                s
            )),
        }
    }
}

/// Mutable change request content shared by stored and new requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestDetails {
    pub submission_date: NaiveDate,

    pub change_request_status: ChangeRequestStatus,

    pub areas_affected: AreaAffected,

    pub reason_for_change: String,

    #[serde(default)]
    pub expected_impact: String,

    #[serde(default)]
    pub proposed_actions: String,

    /// Set once the request is approved or rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_date: Option<NaiveDate>,

    /// Set once the request is implemented
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_date: Option<NaiveDate>,
}

impl ChangeRequestDetails {
    /// A freshly submitted request
    pub fn submitted(
        submission_date: NaiveDate,
        areas_affected: AreaAffected,
        reason_for_change: impl Into<String>,
    ) -> Self {
        Self {
            submission_date,
            change_request_status: ChangeRequestStatus::Submitted,
            areas_affected,
            reason_for_change: reason_for_change.into(),
            expected_impact: String::new(),
            proposed_actions: String::new(),
            evaluation_date: None,
            implementation_date: None,
        }
    }
}

/// A stored change request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: RecordId,

    /// Human-facing unique code (e.g. `CR-2025-0007`)
    pub change_request_number: String,

    /// Originating trigger
    #[serde(default)]
    pub origin: OriginRef,

    #[serde(flatten)]
    pub details: ChangeRequestDetails,

    pub version: u32,
}

/// A change request that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChangeRequest {
    /// Generated from the submission year when absent
    pub change_request_number: Option<String>,

    pub deviation_id: Option<RecordId>,

    pub capa_id: Option<RecordId>,

    pub details: ChangeRequestDetails,
}

impl NewChangeRequest {
    pub fn new(details: ChangeRequestDetails) -> Self {
        Self {
            change_request_number: None,
            deviation_id: None,
            capa_id: None,
            details,
        }
    }
}

/// Format the generated number for the `sequence`-th request of `year`
pub fn format_change_request_number(year: i32, sequence: u32) -> String {
    format!("CR-{}-{:04}", year, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            "under review".parse::<ChangeRequestStatus>().unwrap(),
            ChangeRequestStatus::UnderReview
        );
        assert_eq!(
            "IMPLEMENTED".parse::<ChangeRequestStatus>().unwrap(),
            ChangeRequestStatus::Implemented
        );
        assert!("closed".parse::<ChangeRequestStatus>().is_err());
    }

    #[test]
    fn test_area_from_str() {
        assert_eq!(
            "supply-chain".parse::<AreaAffected>().unwrap(),
            AreaAffected::SupplyChain
        );
        assert_eq!("qc".parse::<AreaAffected>().unwrap(), AreaAffected::QualityControl);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_change_request_number(2025, 7), "CR-2025-0007");
        assert_eq!(format_change_request_number(2025, 12345), "CR-2025-12345");
    }

    #[test]
    fn test_serialized_request_flattens_details() {
        let cr = ChangeRequest {
            id: RecordId::new(4).unwrap(),
            change_request_number: "CR-2025-0001".to_string(),
            origin: OriginRef::Capa(RecordId::new(9).unwrap()),
            details: ChangeRequestDetails::submitted(
                "2025-03-01".parse().unwrap(),
                AreaAffected::Production,
                "Fixture redesign",
            ),
            version: 1,
        };
        let value = serde_json::to_value(&cr).unwrap();
        assert_eq!(value["change_request_status"], "SUBMITTED");
        assert_eq!(value["origin"]["kind"], "capa");
        assert_eq!(value["origin"]["id"], 9);
        assert!(value.get("evaluation_date").is_none());
    }
}
