//! Saved per-user filter preferences for CAPA listings

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::entity::normalize_token;
use crate::core::error::CapaError;
use crate::core::identity::RecordId;
use crate::core::query::Filters;
use crate::entities::capa::{CapaSource, CapaStatus};

/// Trigger classification used by saved views.
///
/// Broader than [`CapaSource`]: market complaints can be recorded as a
/// preference even though no CAPA source corresponds to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSource {
    Audit,
    Deviation,
    MarketComplaint,
    OtherQualityProcesses,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Audit => "AUDIT",
            TriggerSource::Deviation => "DEVIATION",
            TriggerSource::MarketComplaint => "MARKET_COMPLAINT",
            TriggerSource::OtherQualityProcesses => "OTHER_QUALITY_PROCESSES",
        }
    }

    /// The CAPA source a record triggered this way carries, if any
    pub fn capa_source(&self) -> Option<CapaSource> {
        match self {
            TriggerSource::Audit => Some(CapaSource::AuditFindings),
            TriggerSource::Deviation => Some(CapaSource::Deviations),
            TriggerSource::OtherQualityProcesses => Some(CapaSource::OtherQualityProcesses),
            TriggerSource::MarketComplaint => None,
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "AUDIT" => Ok(TriggerSource::Audit),
            "DEVIATION" => Ok(TriggerSource::Deviation),
            "MARKET_COMPLAINT" => Ok(TriggerSource::MarketComplaint),
            "OTHER_QUALITY_PROCESSES" | "OTHER" => Ok(TriggerSource::OtherQualityProcesses),
            _ => Err(format!(
                "Invalid trigger source: {}. Use AUDIT, DEVIATION, MARKET_COMPLAINT, or OTHER_QUALITY_PROCESSES",
                s
            )),
        }
    }
}

/// Inclusive due-date window, stored as `FROM..TO` with either side optional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(from) = self.from {
            write!(f, "{}", from)?;
        }
        f.write_str("..")?;
        if let Some(to) = self.to {
            write!(f, "{}", to)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for DateRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .trim()
            .split_once("..")
            .ok_or_else(|| format!("Invalid date range: {}. Use FROM..TO (YYYY-MM-DD)", s))?;

        let parse = |part: &str| -> Result<Option<NaiveDate>, String> {
            let part = part.trim();
            if part.is_empty() {
                return Ok(None);
            }
            part.parse::<NaiveDate>()
                .map(Some)
                .map_err(|_| format!("Invalid date in range: {}", part))
        };

        let range = DateRange {
            from: parse(from)?,
            to: parse(to)?,
        };

        if let (Some(from), Some(to)) = (range.from, range.to) {
            if from > to {
                return Err(format!("Date range starts after it ends: {}", s));
            }
        }

        Ok(range)
    }
}

impl Serialize for DateRange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateRange {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The filter state a user saved
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CapaStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_source: Option<TriggerSource>,

    /// JSON object of the last filter map applied to a listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_settings: Option<String>,
}

impl FilterSettings {
    /// Record `filters` as the last applied state
    pub fn remember(&mut self, filters: &Filters) {
        // A BTreeMap<String, String> always serializes
        self.last_used_settings = serde_json::to_string(filters).ok();
    }

    /// Replace the view with the filters a listing actually applied.
    ///
    /// The explicit fields are cleared so the recorded map is the whole view.
    pub fn remember_applied(&mut self, filters: &Filters) {
        self.date_range = None;
        self.status = None;
        self.trigger_source = None;
        self.remember(filters);
    }

    /// Expand the saved view into a listing filter map.
    ///
    /// Explicit fields win over keys recovered from `last_used_settings`.
    /// Keys are not checked here; the query builder's allow-list does that.
    pub fn to_filters(&self) -> Result<Filters, CapaError> {
        let mut filters: Filters = match &self.last_used_settings {
            Some(blob) => serde_json::from_str::<BTreeMap<String, String>>(blob).map_err(|e| {
                CapaError::validation("last_used_settings", format!("not a JSON filter map: {}", e))
            })?,
            None => Filters::new(),
        };

        if let Some(status) = self.status {
            filters.insert("capa_status".to_string(), status.to_string());
        }

        if let Some(trigger) = self.trigger_source {
            let source = trigger.capa_source().ok_or_else(|| {
                CapaError::validation(
                    "trigger_source",
                    format!("{} has no matching CAPA source", trigger),
                )
            })?;
            filters.insert("capa_source".to_string(), source.to_string());
        }

        if let Some(range) = self.date_range {
            if let Some(from) = range.from {
                filters.insert("due_date_from".to_string(), from.to_string());
            }
            if let Some(to) = range.to {
                filters.insert("due_date_to".to_string(), to.to_string());
            }
        }

        Ok(filters)
    }
}

/// A stored filter preference row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPreference {
    pub id: RecordId,

    pub user_id: RecordId,

    #[serde(flatten)]
    pub settings: FilterSettings,
}
