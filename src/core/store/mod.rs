//! SQLite-backed record store
//!
//! The store is the only place that talks SQL. Callers hand it validated
//! [`PreparedQuery`] values and typed records; everything that comes back out
//! is either a typed record or a [`StoreError`]. Driver error text never
//! leaves this module.
//!
//! Writes are guarded by a per-row `version` column: an update names the
//! version it read, and a mismatch is reported as [`StoreError::Conflict`].

mod queries;
mod reference;
mod schema;
mod types;

use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, ToSql};
use thiserror::Error;

use crate::core::entity::EntityKind;
use crate::core::identity::RecordId;
use crate::core::links::OriginRef;
use crate::core::query::{PreparedQuery, QueryParam};
use crate::entities::capa::{CapaRecord, NewCapaRecord};
use crate::entities::change_request::{ChangeRequest, ChangeRequestDetails};
use crate::entities::deviation::{DeviationRecord, NewDeviation};
use crate::entities::filter_options::{FilterPreference, FilterSettings};
use crate::entities::personnel::{NewPersonnel, Personnel};

/// Current schema version; older databases are upgraded in place
pub(crate) const SCHEMA_VERSION: i32 = 1;

/// How long a writer waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Store failures, already classified for the caller
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient: the database could not be reached or was locked
    #[error("record store unavailable during {operation}; try again")]
    Unavailable { operation: &'static str },

    #[error("conflicting write to {entity}: {reason}")]
    Conflict { entity: EntityKind, reason: String },

    /// A stored row could not be read back as a valid record
    #[error("stored {entity} data is invalid: {detail}")]
    Corrupt { entity: EntityKind, detail: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: RecordId },

    #[error("database schema version {found} is newer than supported version {supported}")]
    IncompatibleSchema { found: i32, supported: i32 },
}

/// Map a driver error onto the store taxonomy
pub(crate) fn classify(
    err: rusqlite::Error,
    operation: &'static str,
    entity: EntityKind,
) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::FileLockingProtocolFailed
            | ErrorCode::OutOfMemory => StoreError::Unavailable { operation },
            ErrorCode::ConstraintViolation => match failure.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => StoreError::Conflict {
                    entity,
                    reason: "a record with the same unique key already exists".to_string(),
                },
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => StoreError::Conflict {
                    entity,
                    reason: "a referenced record does not exist".to_string(),
                },
                _ => StoreError::Corrupt {
                    entity,
                    detail: format!("constraint violated during {}", operation),
                },
            },
            _ => StoreError::Corrupt {
                entity,
                detail: format!("{} failed", operation),
            },
        },
        rusqlite::Error::FromSqlConversionFailure(column, _, _)
        | rusqlite::Error::InvalidColumnType(column, _, _) => StoreError::Corrupt {
            entity,
            detail: format!("column {} has an unexpected type", column),
        },
        _ => StoreError::Corrupt {
            entity,
            detail: format!("{} failed", operation),
        },
    }
}

impl ToSql for QueryParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            QueryParam::Integer(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            QueryParam::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

/// Persistence for CAPA records
pub trait CapaStore {
    fn insert_capa_record(&self, record: &NewCapaRecord) -> Result<RecordId, StoreError>;

    fn get_capa_record(&self, id: RecordId) -> Result<Option<CapaRecord>, StoreError>;

    /// Overwrite the mutable fields of `record`.
    ///
    /// With `expected_version` set, the write only lands if the stored row is
    /// still at that version. Returns the new version.
    fn update_capa_record(
        &self,
        record: &CapaRecord,
        expected_version: Option<u32>,
    ) -> Result<u32, StoreError>;

    /// Stream matching rows to `visit` until it breaks or the page ends
    fn scan_capa_records(
        &self,
        query: &PreparedQuery<CapaRecord>,
        visit: &mut dyn FnMut(CapaRecord) -> ControlFlow<()>,
    ) -> Result<(), StoreError>;

    fn query_capa_records(
        &self,
        query: &PreparedQuery<CapaRecord>,
    ) -> Result<Vec<CapaRecord>, StoreError> {
        let mut records = Vec::new();
        self.scan_capa_records(query, &mut |record| {
            records.push(record);
            ControlFlow::Continue(())
        })?;
        Ok(records)
    }
}

/// Persistence for change requests
pub trait ChangeRequestStore {
    fn insert_change_request(
        &self,
        number: &str,
        origin: OriginRef,
        details: &ChangeRequestDetails,
    ) -> Result<RecordId, StoreError>;

    fn get_change_request(&self, id: RecordId) -> Result<Option<ChangeRequest>, StoreError>;

    /// Same version contract as [`CapaStore::update_capa_record`]
    fn update_change_request(
        &self,
        request: &ChangeRequest,
        expected_version: Option<u32>,
    ) -> Result<u32, StoreError>;

    fn scan_change_requests(
        &self,
        query: &PreparedQuery<ChangeRequest>,
        visit: &mut dyn FnMut(ChangeRequest) -> ControlFlow<()>,
    ) -> Result<(), StoreError>;

    fn query_change_requests(
        &self,
        query: &PreparedQuery<ChangeRequest>,
    ) -> Result<Vec<ChangeRequest>, StoreError> {
        let mut requests = Vec::new();
        self.scan_change_requests(query, &mut |request| {
            requests.push(request);
            ControlFlow::Continue(())
        })?;
        Ok(requests)
    }

    /// Every change request pointing at `origin`, oldest first
    fn change_requests_by_origin(&self, origin: OriginRef)
        -> Result<Vec<ChangeRequest>, StoreError>;

    /// Largest numeric suffix among `CR-{year}-NNNN` numbers, or 0 when none
    fn highest_change_request_serial(&self, year: i32) -> Result<u32, StoreError>;
}

/// Referenced entities and saved filter preferences
pub trait ReferenceStore {
    fn exists(&self, entity: EntityKind, id: RecordId) -> Result<bool, StoreError>;

    fn insert_personnel(&self, person: &NewPersonnel) -> Result<RecordId, StoreError>;

    fn list_personnel(&self) -> Result<Vec<Personnel>, StoreError>;

    fn insert_deviation(&self, deviation: &NewDeviation) -> Result<RecordId, StoreError>;

    fn list_deviations(&self) -> Result<Vec<DeviationRecord>, StoreError>;

    fn insert_filter_preference(
        &self,
        user_id: RecordId,
        settings: &FilterSettings,
    ) -> Result<RecordId, StoreError>;

    /// Most recently saved preference for `user_id`
    fn latest_filter_preference(
        &self,
        user_id: RecordId,
    ) -> Result<Option<FilterPreference>, StoreError>;
}

/// Everything the service needs from persistence
pub trait RecordStore: CapaStore + ChangeRequestStore + ReferenceStore {}

impl<T: CapaStore + ChangeRequestStore + ReferenceStore + ?Sized> RecordStore for T {}

/// The record store backed by a single SQLite database
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|_| StoreError::Unavailable {
            operation: "open",
        })?;
        Self::from_connection(conn)
    }

    /// A private, empty database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|_| StoreError::Unavailable {
            operation: "open",
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let setup = |e: rusqlite::Error| classify(e, "open", EntityKind::Capa);
        conn.busy_timeout(BUSY_TIMEOUT).map_err(setup)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(setup)?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }
}
