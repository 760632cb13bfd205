//! CAPA and change request persistence

use std::ops::ControlFlow;

use rusqlite::{params, params_from_iter, OptionalExtension};

use super::types::{RawCapaRow, RawChangeRequestRow, CAPA_COLUMNS, CHANGE_REQUEST_COLUMNS};
use super::{classify, CapaStore, ChangeRequestStore, SqliteStore, StoreError};
use crate::core::entity::EntityKind;
use crate::core::identity::RecordId;
use crate::core::links::OriginRef;
use crate::core::query::PreparedQuery;
use crate::entities::capa::{CapaRecord, NewCapaRecord};
use crate::entities::change_request::{ChangeRequest, ChangeRequestDetails};

fn date_text(date: Option<chrono::NaiveDate>) -> Option<String> {
    date.map(|d| d.to_string())
}

impl SqliteStore {
    /// Explain why a versioned update touched no row
    fn missed_update(
        &self,
        entity: EntityKind,
        id: RecordId,
        expected: Option<u32>,
    ) -> StoreError {
        let sql = format!("SELECT version FROM {} WHERE id = ?1", entity.table());
        let current: Result<Option<i64>, _> = self
            .conn
            .query_row(&sql, params![id.get()], |row| row.get(0))
            .optional();

        match current {
            Ok(None) => StoreError::NotFound { entity, id },
            Ok(Some(found)) => StoreError::Conflict {
                entity,
                reason: match expected {
                    Some(expected) => format!(
                        "{} {} is at version {}, expected {}",
                        entity, id, found, expected
                    ),
                    None => format!("{} {} changed during the update", entity, id),
                },
            },
            Err(e) => classify(e, "update", entity),
        }
    }
}

impl CapaStore for SqliteStore {
    fn insert_capa_record(&self, record: &NewCapaRecord) -> Result<RecordId, StoreError> {
        self.conn
            .execute(
                r#"INSERT INTO capa_records
                   (issue_description, capa_source, proposed_actions, capa_status,
                    assigned_personnel_id, due_date, completion_date, opened_on, version)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)"#,
                params![
                    record.issue_description,
                    record.capa_source.as_str(),
                    record.proposed_actions,
                    record.capa_status.as_str(),
                    record.assigned_personnel_id.get(),
                    record.due_date.to_string(),
                    date_text(record.completion_date),
                    record.opened_on.to_string(),
                ],
            )
            .map_err(|e| classify(e, "insert", EntityKind::Capa))?;

        RecordId::new(self.conn.last_insert_rowid()).map_err(|_| StoreError::Corrupt {
            entity: EntityKind::Capa,
            detail: "insert produced an invalid id".to_string(),
        })
    }

    fn get_capa_record(&self, id: RecordId) -> Result<Option<CapaRecord>, StoreError> {
        let sql = format!("SELECT {} FROM capa_records WHERE id = ?1", CAPA_COLUMNS);
        self.conn
            .query_row(&sql, params![id.get()], RawCapaRow::from_row)
            .optional()
            .map_err(|e| classify(e, "read", EntityKind::Capa))?
            .map(CapaRecord::try_from)
            .transpose()
    }

    fn update_capa_record(
        &self,
        record: &CapaRecord,
        expected_version: Option<u32>,
    ) -> Result<u32, StoreError> {
        let new_version: Option<i64> = self
            .conn
            .query_row(
                r#"UPDATE capa_records
                   SET issue_description = ?1, proposed_actions = ?2, capa_status = ?3,
                       assigned_personnel_id = ?4, due_date = ?5, completion_date = ?6,
                       version = version + 1
                   WHERE id = ?7 AND (?8 IS NULL OR version = ?8)
                   RETURNING version"#,
                params![
                    record.issue_description,
                    record.proposed_actions,
                    record.capa_status.as_str(),
                    record.assigned_personnel_id.get(),
                    record.due_date.to_string(),
                    date_text(record.completion_date),
                    record.id.get(),
                    expected_version.map(i64::from),
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| classify(e, "update", EntityKind::Capa))?;

        match new_version {
            Some(v) => u32::try_from(v).map_err(|_| StoreError::Corrupt {
                entity: EntityKind::Capa,
                detail: format!("version overflow on {}", record.id),
            }),
            None => Err(self.missed_update(EntityKind::Capa, record.id, expected_version)),
        }
    }

    fn scan_capa_records(
        &self,
        query: &PreparedQuery<CapaRecord>,
        visit: &mut dyn FnMut(CapaRecord) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let fail = |e: rusqlite::Error| classify(e, "query", EntityKind::Capa);

        let mut stmt = self.conn.prepare(&query.to_sql(CAPA_COLUMNS)).map_err(fail)?;
        let rows = stmt
            .query_map(params_from_iter(query.bind_values()), RawCapaRow::from_row)
            .map_err(fail)?;

        for row in rows {
            let record = CapaRecord::try_from(row.map_err(fail)?)?;
            if visit(record).is_break() {
                break;
            }
        }
        Ok(())
    }
}

impl ChangeRequestStore for SqliteStore {
    fn insert_change_request(
        &self,
        number: &str,
        origin: OriginRef,
        details: &ChangeRequestDetails,
    ) -> Result<RecordId, StoreError> {
        self.conn
            .execute(
                r#"INSERT INTO change_requests
                   (change_request_number, submission_date, change_request_status,
                    areas_affected, reason_for_change, expected_impact, proposed_actions,
                    evaluation_date, implementation_date, fk_deviation_record_id,
                    fk_capa_record_id, version)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1)"#,
                params![
                    number,
                    details.submission_date.to_string(),
                    details.change_request_status.as_str(),
                    details.areas_affected.as_str(),
                    details.reason_for_change,
                    details.expected_impact,
                    details.proposed_actions,
                    date_text(details.evaluation_date),
                    date_text(details.implementation_date),
                    origin.deviation_id().map(RecordId::get),
                    origin.capa_id().map(RecordId::get),
                ],
            )
            .map_err(|e| classify(e, "insert", EntityKind::ChangeRequest))?;

        RecordId::new(self.conn.last_insert_rowid()).map_err(|_| StoreError::Corrupt {
            entity: EntityKind::ChangeRequest,
            detail: "insert produced an invalid id".to_string(),
        })
    }

    fn get_change_request(&self, id: RecordId) -> Result<Option<ChangeRequest>, StoreError> {
        let sql = format!(
            "SELECT {} FROM change_requests WHERE id = ?1",
            CHANGE_REQUEST_COLUMNS
        );
        self.conn
            .query_row(&sql, params![id.get()], RawChangeRequestRow::from_row)
            .optional()
            .map_err(|e| classify(e, "read", EntityKind::ChangeRequest))?
            .map(ChangeRequest::try_from)
            .transpose()
    }

    fn update_change_request(
        &self,
        request: &ChangeRequest,
        expected_version: Option<u32>,
    ) -> Result<u32, StoreError> {
        let details = &request.details;
        let new_version: Option<i64> = self
            .conn
            .query_row(
                r#"UPDATE change_requests
                   SET change_request_status = ?1, areas_affected = ?2, reason_for_change = ?3,
                       expected_impact = ?4, proposed_actions = ?5, evaluation_date = ?6,
                       implementation_date = ?7, fk_deviation_record_id = ?8,
                       fk_capa_record_id = ?9, version = version + 1
                   WHERE id = ?10 AND (?11 IS NULL OR version = ?11)
                   RETURNING version"#,
                params![
                    details.change_request_status.as_str(),
                    details.areas_affected.as_str(),
                    details.reason_for_change,
                    details.expected_impact,
                    details.proposed_actions,
                    date_text(details.evaluation_date),
                    date_text(details.implementation_date),
                    request.origin.deviation_id().map(RecordId::get),
                    request.origin.capa_id().map(RecordId::get),
                    request.id.get(),
                    expected_version.map(i64::from),
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| classify(e, "update", EntityKind::ChangeRequest))?;

        match new_version {
            Some(v) => u32::try_from(v).map_err(|_| StoreError::Corrupt {
                entity: EntityKind::ChangeRequest,
                detail: format!("version overflow on {}", request.id),
            }),
            None => Err(self.missed_update(
                EntityKind::ChangeRequest,
                request.id,
                expected_version,
            )),
        }
    }

    fn scan_change_requests(
        &self,
        query: &PreparedQuery<ChangeRequest>,
        visit: &mut dyn FnMut(ChangeRequest) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let fail = |e: rusqlite::Error| classify(e, "query", EntityKind::ChangeRequest);

        let mut stmt = self
            .conn
            .prepare(&query.to_sql(CHANGE_REQUEST_COLUMNS))
            .map_err(fail)?;
        let rows = stmt
            .query_map(
                params_from_iter(query.bind_values()),
                RawChangeRequestRow::from_row,
            )
            .map_err(fail)?;

        for row in rows {
            let request = ChangeRequest::try_from(row.map_err(fail)?)?;
            if visit(request).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn change_requests_by_origin(
        &self,
        origin: OriginRef,
    ) -> Result<Vec<ChangeRequest>, StoreError> {
        let fail = |e: rusqlite::Error| classify(e, "query", EntityKind::ChangeRequest);

        let (condition, value) = match origin {
            OriginRef::Deviation(id) => ("fk_deviation_record_id = ?1", Some(id.get())),
            OriginRef::Capa(id) => ("fk_capa_record_id = ?1", Some(id.get())),
            OriginRef::None => (
                "fk_deviation_record_id IS NULL AND fk_capa_record_id IS NULL AND ?1 IS NULL",
                None,
            ),
        };
        let sql = format!(
            "SELECT {} FROM change_requests WHERE {} ORDER BY id ASC",
            CHANGE_REQUEST_COLUMNS, condition
        );

        let mut stmt = self.conn.prepare(&sql).map_err(fail)?;
        let rows = stmt
            .query_map(params![value], RawChangeRequestRow::from_row)
            .map_err(fail)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(ChangeRequest::try_from(row.map_err(fail)?)?);
        }
        Ok(requests)
    }

    fn highest_change_request_serial(&self, year: i32) -> Result<u32, StoreError> {
        let prefix = format!("CR-{}-", year);
        let highest: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(CAST(substr(change_request_number, ?2) AS INTEGER))
                 FROM change_requests
                 WHERE change_request_number GLOB ?1 || '[0-9]*'
                   AND substr(change_request_number, ?2) NOT GLOB '*[^0-9]*'",
                params![prefix, prefix.len() as i64 + 1],
                |row| row.get(0),
            )
            .map_err(|e| classify(e, "count", EntityKind::ChangeRequest))?;
        Ok(highest.map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::query::{Filters, QueryBuilder, SortKey};
    use crate::core::store::ReferenceStore;
    use crate::entities::capa::{CapaSource, CapaStatus};
    use crate::entities::change_request::AreaAffected;
    use crate::entities::personnel::NewPersonnel;

    fn date(s: &str) -> chrono::NaiveDate {
        s.parse().unwrap()
    }

    fn store_with_person() -> (SqliteStore, RecordId) {
        let store = SqliteStore::open_in_memory().unwrap();
        let person = store
            .insert_personnel(&NewPersonnel {
                name: "Dana Whitfield".to_string(),
                email: None,
            })
            .unwrap();
        (store, person)
    }

    fn new_capa(person: RecordId, due: &str) -> NewCapaRecord {
        let mut record = NewCapaRecord::new(
            "Torque values drift on station 4",
            CapaSource::Deviations,
            person,
            date(due),
        );
        record.opened_on = date("2025-01-01");
        record
    }

    #[test]
    fn test_capa_insert_and_get() {
        let (store, person) = store_with_person();
        let id = store.insert_capa_record(&new_capa(person, "2025-03-01")).unwrap();

        let record = store.get_capa_record(id).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.capa_status, CapaStatus::Open);
        assert_eq!(record.assigned_personnel_id, person);
        assert_eq!(record.version, 1);

        let missing = RecordId::new(999).unwrap();
        assert!(store.get_capa_record(missing).unwrap().is_none());
    }

    #[test]
    fn test_update_bumps_version_and_detects_stale_writes() {
        let (store, person) = store_with_person();
        let id = store.insert_capa_record(&new_capa(person, "2025-03-01")).unwrap();
        let mut record = store.get_capa_record(id).unwrap().unwrap();

        record.capa_status = CapaStatus::UnderReview;
        assert_eq!(store.update_capa_record(&record, Some(1)).unwrap(), 2);

        record.capa_status = CapaStatus::Approved;
        let err = store.update_capa_record(&record, Some(1)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { entity: EntityKind::Capa, .. }));

        let stored = store.get_capa_record(id).unwrap().unwrap();
        assert_eq!(stored.capa_status, CapaStatus::UnderReview);
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn test_update_missing_row_is_not_found() {
        let (store, person) = store_with_person();
        let id = store.insert_capa_record(&new_capa(person, "2025-03-01")).unwrap();
        let mut record = store.get_capa_record(id).unwrap().unwrap();
        record.id = RecordId::new(77).unwrap();

        assert!(matches!(
            store.update_capa_record(&record, None),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_scan_stops_when_visitor_breaks() {
        let (store, person) = store_with_person();
        for due in ["2025-03-01", "2025-02-01", "2025-01-01"] {
            store.insert_capa_record(&new_capa(person, due)).unwrap();
        }
        let query = QueryBuilder::new(100)
            .build::<CapaRecord>(&Filters::new(), 1, 10, &"due_date".parse().unwrap())
            .unwrap();

        let mut seen = Vec::new();
        store
            .scan_capa_records(&query, &mut |record| {
                seen.push(record.due_date);
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, vec![date("2025-01-01"), date("2025-02-01")]);
    }

    #[test]
    fn test_filtered_query_binds_values() {
        let (store, person) = store_with_person();
        let first = store.insert_capa_record(&new_capa(person, "2025-03-01")).unwrap();
        store.insert_capa_record(&new_capa(person, "2025-09-01")).unwrap();

        let filters: Filters = [("due_date_to".to_string(), "2025-06-30".to_string())]
            .into_iter()
            .collect();
        let query = QueryBuilder::new(100)
            .build::<CapaRecord>(&filters, 1, 10, &SortKey::default())
            .unwrap();
        let records = store.query_capa_records(&query).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, first);
    }

    #[test]
    fn test_change_request_roundtrip_and_origin_lookup() {
        let (store, person) = store_with_person();
        let capa = store.insert_capa_record(&new_capa(person, "2025-03-01")).unwrap();

        let details = ChangeRequestDetails::submitted(
            date("2025-02-10"),
            AreaAffected::Production,
            "Replace torque driver",
        );
        let id = store
            .insert_change_request("CR-2025-0001", OriginRef::Capa(capa), &details)
            .unwrap();
        store
            .insert_change_request("CR-2025-0002", OriginRef::None, &details)
            .unwrap();

        let request = store.get_change_request(id).unwrap().unwrap();
        assert_eq!(request.origin, OriginRef::Capa(capa));
        assert_eq!(request.details, details);

        let linked = store.change_requests_by_origin(OriginRef::Capa(capa)).unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, id);

        let unlinked = store.change_requests_by_origin(OriginRef::None).unwrap();
        assert_eq!(unlinked.len(), 1);
        assert_eq!(unlinked[0].change_request_number, "CR-2025-0002");

        assert_eq!(store.highest_change_request_serial(2025).unwrap(), 2);
        assert_eq!(store.highest_change_request_serial(2024).unwrap(), 0);
    }

    #[test]
    fn test_duplicate_change_request_number_conflicts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let details = ChangeRequestDetails::submitted(
            date("2025-02-10"),
            AreaAffected::SupplyChain,
            "Second source for gaskets",
        );
        store
            .insert_change_request("CR-2025-0001", OriginRef::None, &details)
            .unwrap();
        let err = store
            .insert_change_request("CR-2025-0001", OriginRef::None, &details)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn test_highest_serial_skips_gaps_and_free_form_numbers() {
        let store = SqliteStore::open_in_memory().unwrap();
        let details = ChangeRequestDetails::submitted(
            date("2025-02-10"),
            AreaAffected::Operations,
            "Rebalance shift handover",
        );
        for number in ["CR-2025-0007", "CR-2025-0003", "CR-2025-draft", "CR-2026-0040"] {
            store
                .insert_change_request(number, OriginRef::None, &details)
                .unwrap();
        }

        assert_eq!(store.highest_change_request_serial(2025).unwrap(), 7);
        assert_eq!(store.highest_change_request_serial(2026).unwrap(), 40);
        assert_eq!(store.highest_change_request_serial(2027).unwrap(), 0);
    }
}
