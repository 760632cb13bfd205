//! Entity kinds known to the store

use std::fmt;

/// The record kinds persisted by qtrack, with their backing tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Capa,
    ChangeRequest,
    Deviation,
    Personnel,
    FilterPreference,
}

impl EntityKind {
    /// Table holding rows of this kind
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Capa => "capa_records",
            EntityKind::ChangeRequest => "change_requests",
            EntityKind::Deviation => "deviation_records",
            EntityKind::Personnel => "personnel",
            EntityKind::FilterPreference => "capa_records_filter_options",
        }
    }

    /// Human-facing name used in messages
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Capa => "CAPA record",
            EntityKind::ChangeRequest => "change request",
            EntityKind::Deviation => "deviation record",
            EntityKind::Personnel => "personnel",
            EntityKind::FilterPreference => "filter preference",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Normalize a user-supplied enum token (`under-review`, `Under Review`)
/// to the stored upper snake-case form (`UNDER_REVIEW`)
pub fn normalize_token(s: &str) -> String {
    s.trim().to_uppercase().replace(['-', ' '], "_")
}
