//! Error taxonomy surfaced by the core
//!
//! Each component owns its error enum; [`CapaError`] is what the service
//! returns. No raw store error text crosses this boundary.

use miette::Diagnostic;
use thiserror::Error;

use crate::core::links::RelationshipError;
use crate::core::query::QueryError;
use crate::core::store::StoreError;
use crate::core::workflow::WorkflowError;

/// Result alias for core operations
pub type Result<T, E = CapaError> = std::result::Result<T, E>;

/// Every failure a core operation can report
#[derive(Debug, Error, Diagnostic)]
pub enum CapaError {
    /// Bad input shape: missing required field, malformed value
    #[error("invalid {field}: {reason}")]
    #[diagnostic(code(qtrack::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(qtrack::transition))]
    Transition(#[from] WorkflowError),

    #[error(transparent)]
    #[diagnostic(code(qtrack::relationship))]
    Relationship(#[from] RelationshipError),

    #[error(transparent)]
    #[diagnostic(code(qtrack::query))]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(code(qtrack::store))]
    Store(#[from] StoreError),
}

impl CapaError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CapaError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Only an unavailable store may be retried as-is; everything else
    /// needs the caller to fix input or state first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CapaError::Store(StoreError::Unavailable { .. }))
    }
}

/// Reject blank required text
pub(crate) fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(CapaError::validation(field, "must not be empty"))
    } else {
        Ok(())
    }
}
