//! Personnel, deviations, and saved filter preferences

use rusqlite::{params, OptionalExtension};

use super::types::{
    deviation_from_raw, deviation_from_row, personnel_from_raw, personnel_from_row, RawFilterRow,
};
use super::{classify, ReferenceStore, SqliteStore, StoreError};
use crate::core::entity::EntityKind;
use crate::core::identity::RecordId;
use crate::entities::deviation::{DeviationRecord, NewDeviation};
use crate::entities::filter_options::{FilterPreference, FilterSettings};
use crate::entities::personnel::{NewPersonnel, Personnel};

impl SqliteStore {
    fn inserted_id(&self, entity: EntityKind) -> Result<RecordId, StoreError> {
        RecordId::new(self.conn.last_insert_rowid()).map_err(|_| StoreError::Corrupt {
            entity,
            detail: "insert produced an invalid id".to_string(),
        })
    }
}

impl ReferenceStore for SqliteStore {
    fn exists(&self, entity: EntityKind, id: RecordId) -> Result<bool, StoreError> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", entity.table());
        self.conn
            .query_row(&sql, params![id.get()], |_| Ok(()))
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| classify(e, "lookup", entity))
    }

    fn insert_personnel(&self, person: &NewPersonnel) -> Result<RecordId, StoreError> {
        self.conn
            .execute(
                "INSERT INTO personnel (name, email) VALUES (?1, ?2)",
                params![person.name, person.email],
            )
            .map_err(|e| classify(e, "insert", EntityKind::Personnel))?;
        self.inserted_id(EntityKind::Personnel)
    }

    fn list_personnel(&self) -> Result<Vec<Personnel>, StoreError> {
        let fail = |e: rusqlite::Error| classify(e, "query", EntityKind::Personnel);
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, email FROM personnel ORDER BY id ASC")
            .map_err(fail)?;
        let rows = stmt.query_map([], personnel_from_row).map_err(fail)?;

        let mut people = Vec::new();
        for row in rows {
            people.push(personnel_from_raw(row.map_err(fail)?)?);
        }
        Ok(people)
    }

    fn insert_deviation(&self, deviation: &NewDeviation) -> Result<RecordId, StoreError> {
        self.conn
            .execute(
                "INSERT INTO deviation_records (deviation_number, description, reported_on) \
                 VALUES (?1, ?2, ?3)",
                params![
                    deviation.deviation_number,
                    deviation.description,
                    deviation.reported_on.to_string(),
                ],
            )
            .map_err(|e| classify(e, "insert", EntityKind::Deviation))?;
        self.inserted_id(EntityKind::Deviation)
    }

    fn list_deviations(&self) -> Result<Vec<DeviationRecord>, StoreError> {
        let fail = |e: rusqlite::Error| classify(e, "query", EntityKind::Deviation);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, deviation_number, description, reported_on \
                 FROM deviation_records ORDER BY id ASC",
            )
            .map_err(fail)?;
        let rows = stmt.query_map([], deviation_from_row).map_err(fail)?;

        let mut deviations = Vec::new();
        for row in rows {
            deviations.push(deviation_from_raw(row.map_err(fail)?)?);
        }
        Ok(deviations)
    }

    fn insert_filter_preference(
        &self,
        user_id: RecordId,
        settings: &FilterSettings,
    ) -> Result<RecordId, StoreError> {
        self.conn
            .execute(
                r#"INSERT INTO capa_records_filter_options
                   (user_id, date_range, status, trigger_source, last_used_settings)
                   VALUES (?1, ?2, ?3, ?4, ?5)"#,
                params![
                    user_id.get(),
                    settings.date_range.map(|r| r.to_string()),
                    settings.status.map(|s| s.as_str()),
                    settings.trigger_source.map(|t| t.as_str()),
                    settings.last_used_settings,
                ],
            )
            .map_err(|e| classify(e, "insert", EntityKind::FilterPreference))?;
        self.inserted_id(EntityKind::FilterPreference)
    }

    fn latest_filter_preference(
        &self,
        user_id: RecordId,
    ) -> Result<Option<FilterPreference>, StoreError> {
        self.conn
            .query_row(
                r#"SELECT id, user_id, date_range, status, trigger_source, last_used_settings
                   FROM capa_records_filter_options
                   WHERE user_id = ?1
                   ORDER BY id DESC
                   LIMIT 1"#,
                params![user_id.get()],
                RawFilterRow::from_row,
            )
            .optional()
            .map_err(|e| classify(e, "read", EntityKind::FilterPreference))?
            .map(FilterPreference::try_from)
            .transpose()
    }
}
