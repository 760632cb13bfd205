//! Database schema initialization

use rusqlite::{params, OptionalExtension};

use super::{classify, SqliteStore, StoreError, SCHEMA_VERSION};
use crate::core::entity::EntityKind;

impl SqliteStore {
    /// Create missing tables and record the schema version
    pub(super) fn init_schema(&self) -> Result<(), StoreError> {
        let fail = |e: rusqlite::Error| classify(e, "schema setup", EntityKind::Capa);

        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS personnel (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT
            );

            CREATE TABLE IF NOT EXISTS deviation_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                deviation_number TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                reported_on TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS capa_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                issue_description TEXT NOT NULL,
                capa_source TEXT NOT NULL,
                proposed_actions TEXT NOT NULL DEFAULT '',
                capa_status TEXT NOT NULL,
                assigned_personnel_id INTEGER NOT NULL REFERENCES personnel(id),
                due_date TEXT NOT NULL,
                completion_date TEXT,
                opened_on TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_capa_status ON capa_records(capa_status);
            CREATE INDEX IF NOT EXISTS idx_capa_source ON capa_records(capa_source);
            CREATE INDEX IF NOT EXISTS idx_capa_due_date ON capa_records(due_date);
            CREATE INDEX IF NOT EXISTS idx_capa_personnel ON capa_records(assigned_personnel_id);

            CREATE TABLE IF NOT EXISTS change_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                change_request_number TEXT NOT NULL UNIQUE,
                submission_date TEXT NOT NULL,
                change_request_status TEXT NOT NULL,
                areas_affected TEXT NOT NULL,
                reason_for_change TEXT NOT NULL,
                expected_impact TEXT NOT NULL DEFAULT '',
                proposed_actions TEXT NOT NULL DEFAULT '',
                evaluation_date TEXT,
                implementation_date TEXT,
                fk_deviation_record_id INTEGER REFERENCES deviation_records(id),
                fk_capa_record_id INTEGER REFERENCES capa_records(id),
                version INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_cr_status ON change_requests(change_request_status);
            CREATE INDEX IF NOT EXISTS idx_cr_capa ON change_requests(fk_capa_record_id);
            CREATE INDEX IF NOT EXISTS idx_cr_deviation ON change_requests(fk_deviation_record_id);

            CREATE TABLE IF NOT EXISTS capa_records_filter_options (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                date_range TEXT,
                status TEXT,
                trigger_source TEXT,
                last_used_settings TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_filter_user ON capa_records_filter_options(user_id);
            "#,
            )
            .map_err(fail)?;

        let found: Option<i32> = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get::<_, Option<i32>>(0)
            })
            .optional()
            .map_err(fail)?
            .flatten();

        match found {
            Some(found) if found > SCHEMA_VERSION => Err(StoreError::IncompatibleSchema {
                found,
                supported: SCHEMA_VERSION,
            }),
            Some(found) if found == SCHEMA_VERSION => Ok(()),
            _ => {
                self.conn
                    .execute(
                        "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                        params![SCHEMA_VERSION],
                    )
                    .map_err(fail)?;
                Ok(())
            }
        }
    }

    /// Version recorded in the open database
    pub fn schema_version(&self) -> Result<i32, StoreError> {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get::<_, Option<i32>>(0)
            })
            .map(|v| v.unwrap_or(0))
            .map_err(|e| classify(e, "schema check", EntityKind::Capa))
    }
}
