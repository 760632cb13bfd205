//! Entity type definitions
//!
//! qtrack tracks the following records:
//!
//! - [`CapaRecord`] - Corrective and preventive actions with a fixed lifecycle
//! - [`ChangeRequest`] - Proposed changes, optionally triggered by a CAPA or deviation
//! - [`DeviationRecord`] - Referenced non-conformities (identity only)
//! - [`Personnel`] - Referenced staff members
//! - [`FilterPreference`] - Saved per-user listing views

pub mod capa;
pub mod change_request;
pub mod deviation;
pub mod filter_options;
pub mod personnel;

pub use capa::{CapaPatch, CapaRecord, CapaSource, CapaStatus, NewCapaRecord};
pub use change_request::{
    AreaAffected, ChangeRequest, ChangeRequestDetails, ChangeRequestStatus, NewChangeRequest,
};
pub use deviation::{DeviationRecord, NewDeviation};
pub use filter_options::{DateRange, FilterPreference, FilterSettings, TriggerSource};
pub use personnel::{NewPersonnel, Personnel};
