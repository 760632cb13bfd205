//! Raw row shapes and their conversion into typed records
//!
//! Rows are first read as plain SQL values, then validated. Anything that
//! does not parse back into a record is reported as [`StoreError::Corrupt`].

use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::Row;

use super::StoreError;
use crate::core::entity::EntityKind;
use crate::core::identity::RecordId;
use crate::core::links::OriginRef;
use crate::entities::capa::CapaRecord;
use crate::entities::change_request::{ChangeRequest, ChangeRequestDetails};
use crate::entities::deviation::DeviationRecord;
use crate::entities::filter_options::{FilterPreference, FilterSettings};
use crate::entities::personnel::Personnel;

pub(super) const CAPA_COLUMNS: &str = "id, issue_description, capa_source, proposed_actions, \
     capa_status, assigned_personnel_id, due_date, completion_date, opened_on, version";

pub(super) const CHANGE_REQUEST_COLUMNS: &str = "id, change_request_number, submission_date, \
     change_request_status, areas_affected, reason_for_change, expected_impact, \
     proposed_actions, evaluation_date, implementation_date, fk_deviation_record_id, \
     fk_capa_record_id, version";

/// Column-level decoding for one entity kind
struct Decoder {
    entity: EntityKind,
}

impl Decoder {
    fn corrupt(&self, detail: String) -> StoreError {
        StoreError::Corrupt {
            entity: self.entity,
            detail,
        }
    }

    fn id(&self, column: &str, raw: i64) -> Result<RecordId, StoreError> {
        RecordId::new(raw).map_err(|_| self.corrupt(format!("{} holds invalid id {}", column, raw)))
    }

    fn opt_id(&self, column: &str, raw: Option<i64>) -> Result<Option<RecordId>, StoreError> {
        raw.map(|raw| self.id(column, raw)).transpose()
    }

    fn date(&self, column: &str, raw: &str) -> Result<NaiveDate, StoreError> {
        raw.parse::<NaiveDate>()
            .map_err(|_| self.corrupt(format!("{} holds invalid date '{}'", column, raw)))
    }

    fn opt_date(&self, column: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, StoreError> {
        raw.map(|raw| self.date(column, raw)).transpose()
    }

    fn token<T: FromStr>(&self, column: &str, raw: &str) -> Result<T, StoreError> {
        raw.parse::<T>()
            .map_err(|_| self.corrupt(format!("{} holds unknown value '{}'", column, raw)))
    }

    fn version(&self, raw: i64) -> Result<u32, StoreError> {
        u32::try_from(raw)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| self.corrupt(format!("version holds invalid value {}", raw)))
    }
}

/// A `capa_records` row as stored
pub(super) struct RawCapaRow {
    id: i64,
    issue_description: String,
    capa_source: String,
    proposed_actions: String,
    capa_status: String,
    assigned_personnel_id: i64,
    due_date: String,
    completion_date: Option<String>,
    opened_on: String,
    version: i64,
}

impl RawCapaRow {
    /// Read a row selected with [`CAPA_COLUMNS`]
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            issue_description: row.get(1)?,
            capa_source: row.get(2)?,
            proposed_actions: row.get(3)?,
            capa_status: row.get(4)?,
            assigned_personnel_id: row.get(5)?,
            due_date: row.get(6)?,
            completion_date: row.get(7)?,
            opened_on: row.get(8)?,
            version: row.get(9)?,
        })
    }
}

impl TryFrom<RawCapaRow> for CapaRecord {
    type Error = StoreError;

    fn try_from(raw: RawCapaRow) -> Result<Self, Self::Error> {
        let d = Decoder {
            entity: EntityKind::Capa,
        };
        Ok(CapaRecord {
            id: d.id("id", raw.id)?,
            issue_description: raw.issue_description,
            capa_source: d.token("capa_source", &raw.capa_source)?,
            proposed_actions: raw.proposed_actions,
            capa_status: d.token("capa_status", &raw.capa_status)?,
            assigned_personnel_id: d.id("assigned_personnel_id", raw.assigned_personnel_id)?,
            due_date: d.date("due_date", &raw.due_date)?,
            completion_date: d.opt_date("completion_date", raw.completion_date.as_deref())?,
            opened_on: d.date("opened_on", &raw.opened_on)?,
            version: d.version(raw.version)?,
        })
    }
}

/// A `change_requests` row as stored
pub(super) struct RawChangeRequestRow {
    id: i64,
    change_request_number: String,
    submission_date: String,
    change_request_status: String,
    areas_affected: String,
    reason_for_change: String,
    expected_impact: String,
    proposed_actions: String,
    evaluation_date: Option<String>,
    implementation_date: Option<String>,
    fk_deviation_record_id: Option<i64>,
    fk_capa_record_id: Option<i64>,
    version: i64,
}

impl RawChangeRequestRow {
    /// Read a row selected with [`CHANGE_REQUEST_COLUMNS`]
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            change_request_number: row.get(1)?,
            submission_date: row.get(2)?,
            change_request_status: row.get(3)?,
            areas_affected: row.get(4)?,
            reason_for_change: row.get(5)?,
            expected_impact: row.get(6)?,
            proposed_actions: row.get(7)?,
            evaluation_date: row.get(8)?,
            implementation_date: row.get(9)?,
            fk_deviation_record_id: row.get(10)?,
            fk_capa_record_id: row.get(11)?,
            version: row.get(12)?,
        })
    }
}

impl TryFrom<RawChangeRequestRow> for ChangeRequest {
    type Error = StoreError;

    fn try_from(raw: RawChangeRequestRow) -> Result<Self, Self::Error> {
        let d = Decoder {
            entity: EntityKind::ChangeRequest,
        };
        let origin = OriginRef::from_columns(
            d.opt_id("fk_deviation_record_id", raw.fk_deviation_record_id)?,
            d.opt_id("fk_capa_record_id", raw.fk_capa_record_id)?,
        )
        .map_err(|e| d.corrupt(e.to_string()))?;

        Ok(ChangeRequest {
            id: d.id("id", raw.id)?,
            change_request_number: raw.change_request_number,
            origin,
            details: ChangeRequestDetails {
                submission_date: d.date("submission_date", &raw.submission_date)?,
                change_request_status: d
                    .token("change_request_status", &raw.change_request_status)?,
                areas_affected: d.token("areas_affected", &raw.areas_affected)?,
                reason_for_change: raw.reason_for_change,
                expected_impact: raw.expected_impact,
                proposed_actions: raw.proposed_actions,
                evaluation_date: d.opt_date("evaluation_date", raw.evaluation_date.as_deref())?,
                implementation_date: d
                    .opt_date("implementation_date", raw.implementation_date.as_deref())?,
            },
            version: d.version(raw.version)?,
        })
    }
}

pub(super) fn personnel_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, Option<String>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

pub(super) fn personnel_from_raw(
    (id, name, email): (i64, String, Option<String>),
) -> Result<Personnel, StoreError> {
    let d = Decoder {
        entity: EntityKind::Personnel,
    };
    Ok(Personnel {
        id: d.id("id", id)?,
        name,
        email,
    })
}

pub(super) fn deviation_from_row(
    row: &Row<'_>,
) -> rusqlite::Result<(i64, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

pub(super) fn deviation_from_raw(
    (id, deviation_number, description, reported_on): (i64, String, String, String),
) -> Result<DeviationRecord, StoreError> {
    let d = Decoder {
        entity: EntityKind::Deviation,
    };
    Ok(DeviationRecord {
        id: d.id("id", id)?,
        deviation_number,
        description,
        reported_on: d.date("reported_on", &reported_on)?,
    })
}

/// A `capa_records_filter_options` row as stored
pub(super) struct RawFilterRow {
    id: i64,
    user_id: i64,
    date_range: Option<String>,
    status: Option<String>,
    trigger_source: Option<String>,
    last_used_settings: Option<String>,
}

impl RawFilterRow {
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            date_range: row.get(2)?,
            status: row.get(3)?,
            trigger_source: row.get(4)?,
            last_used_settings: row.get(5)?,
        })
    }
}

impl TryFrom<RawFilterRow> for FilterPreference {
    type Error = StoreError;

    fn try_from(raw: RawFilterRow) -> Result<Self, Self::Error> {
        let d = Decoder {
            entity: EntityKind::FilterPreference,
        };
        Ok(FilterPreference {
            id: d.id("id", raw.id)?,
            user_id: d.id("user_id", raw.user_id)?,
            settings: FilterSettings {
                date_range: raw
                    .date_range
                    .as_deref()
                    .map(|s| d.token("date_range", s))
                    .transpose()?,
                status: raw
                    .status
                    .as_deref()
                    .map(|s| d.token("status", s))
                    .transpose()?,
                trigger_source: raw
                    .trigger_source
                    .as_deref()
                    .map(|s| d.token("trigger_source", s))
                    .transpose()?,
                last_used_settings: raw.last_used_settings,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::capa::CapaStatus;

    fn capa_row() -> RawCapaRow {
        RawCapaRow {
            id: 1,
            issue_description: "Seal failure".to_string(),
            capa_source: "AUDIT_FINDINGS".to_string(),
            proposed_actions: String::new(),
            capa_status: "UNDER_REVIEW".to_string(),
            assigned_personnel_id: 3,
            due_date: "2025-06-30".to_string(),
            completion_date: None,
            opened_on: "2025-01-15".to_string(),
            version: 2,
        }
    }

    #[test]
    fn test_capa_row_decodes() {
        let record = CapaRecord::try_from(capa_row()).unwrap();
        assert_eq!(record.capa_status, CapaStatus::UnderReview);
        assert_eq!(record.version, 2);
        assert_eq!(record.due_date.to_string(), "2025-06-30");
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let mut row = capa_row();
        row.capa_status = "PENDING".to_string();
        let err = CapaRecord::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { entity: EntityKind::Capa, ref detail } if detail.contains("capa_status")));
    }

    #[test]
    fn test_bad_date_is_corrupt() {
        let mut row = capa_row();
        row.completion_date = Some("yesterday".to_string());
        assert!(matches!(
            CapaRecord::try_from(row),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_change_request_with_both_origins_is_corrupt() {
        let row = RawChangeRequestRow {
            id: 4,
            change_request_number: "CR-2025-0004".to_string(),
            submission_date: "2025-02-01".to_string(),
            change_request_status: "SUBMITTED".to_string(),
            areas_affected: "PRODUCTION".to_string(),
            reason_for_change: "Line speed".to_string(),
            expected_impact: String::new(),
            proposed_actions: String::new(),
            evaluation_date: None,
            implementation_date: None,
            fk_deviation_record_id: Some(1),
            fk_capa_record_id: Some(2),
            version: 1,
        };
        assert!(matches!(
            ChangeRequest::try_from(row),
            Err(StoreError::Corrupt {
                entity: EntityKind::ChangeRequest,
                ..
            })
        ));
    }
}
