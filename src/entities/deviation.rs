//! Deviation record - referenced by change requests
//!
//! Deviations are owned by a separate process. qtrack keeps only the fields
//! needed to identify one and to satisfy references to it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::identity::RecordId;

/// A stored deviation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationRecord {
    pub id: RecordId,

    /// Human-facing unique code (e.g. `DEV-0042`)
    pub deviation_number: String,

    pub description: String,

    pub reported_on: NaiveDate,
}

/// A deviation record that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeviation {
    pub deviation_number: String,
    pub description: String,
    pub reported_on: NaiveDate,
}
