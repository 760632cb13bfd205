//! Record identity: store-assigned positive integer keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a stored record.
///
/// Ids are assigned by the store on insert and never change afterwards.
/// Every id is strictly positive, so no value doubles as a "missing" marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RecordId(i64);

impl RecordId {
    /// Wrap a raw key, rejecting zero and negative values
    pub fn new(raw: i64) -> Result<Self, IdParseError> {
        if raw > 0 {
            Ok(Self(raw))
        } else {
            Err(IdParseError::NotPositive(raw))
        }
    }

    /// The raw integer key
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = IdParseError;

    /// Accepts `42` or `#42`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        let raw: i64 = digits
            .parse()
            .map_err(|_| IdParseError::Invalid(s.to_string()))?;
        Self::new(raw)
    }
}

impl TryFrom<i64> for RecordId {
    type Error = IdParseError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<RecordId> for i64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// Errors when parsing record ids
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    #[error("record ids must be positive (got {0})")]
    NotPositive(i64),

    #[error("invalid record id: {0}")]
    Invalid(String),
}
