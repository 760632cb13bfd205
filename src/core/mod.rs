//! Core module - lifecycle rules, links, queries, and persistence

pub mod config;
pub mod entity;
pub mod error;
pub mod identity;
pub mod links;
pub mod project;
pub mod query;
pub mod service;
pub mod store;
pub mod workflow;

pub use config::{Config, ConfigError};
pub use entity::EntityKind;
pub use error::{CapaError, Result};
pub use identity::{IdParseError, RecordId};
pub use links::{OriginRef, RelationshipError, RelationshipResolver};
pub use project::{Project, ProjectError};
pub use query::{Filters, PreparedQuery, QueryBuilder, QueryError, SortDirection, SortKey};
pub use service::{CapaService, PageRequest};
pub use store::{RecordStore, SqliteStore, StoreError};
pub use workflow::{Lifecycle, TransitionPolicy, WorkflowEngine, WorkflowError};
