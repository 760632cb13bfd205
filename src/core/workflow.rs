//! Workflow engine for status transitions
//!
//! Holds the legal lifecycle tables for CAPA records and change requests and
//! the date rules tied to them. The store is lifecycle-agnostic; legality is
//! decided here only.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::identity::RecordId;
use crate::entities::capa::{CapaRecord, CapaStatus};
use crate::entities::change_request::{ChangeRequest, ChangeRequestDetails, ChangeRequestStatus};

/// How strictly lifecycle rules are enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Reject moves outside the transition tables
    #[default]
    Strict,
    /// Accept any status move (legacy behaviour)
    Permissive,
}

impl std::fmt::Display for TransitionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionPolicy::Strict => write!(f, "strict"),
            TransitionPolicy::Permissive => write!(f, "permissive"),
        }
    }
}

impl std::str::FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(TransitionPolicy::Strict),
            "permissive" => Ok(TransitionPolicy::Permissive),
            _ => Err(format!(
                "Invalid transition policy: {}. Use strict or permissive",
                s
            )),
        }
    }
}

/// A status vocabulary with a fixed transition table
pub trait Lifecycle: Copy + Eq + Default + std::fmt::Display + 'static {
    /// Record kind, for messages
    const ENTITY: &'static str;

    /// Legal targets from `self`
    fn allowed_transitions(self) -> &'static [Self];

    fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl Lifecycle for CapaStatus {
    const ENTITY: &'static str = "CAPA record";

    fn allowed_transitions(self) -> &'static [Self] {
        match self {
            CapaStatus::Open => &[CapaStatus::UnderReview],
            CapaStatus::UnderReview => &[CapaStatus::Approved],
            CapaStatus::Approved => &[CapaStatus::Closed],
            CapaStatus::Closed => &[],
        }
    }
}

impl Lifecycle for ChangeRequestStatus {
    const ENTITY: &'static str = "change request";

    fn allowed_transitions(self) -> &'static [Self] {
        match self {
            ChangeRequestStatus::Submitted => &[ChangeRequestStatus::UnderReview],
            ChangeRequestStatus::UnderReview => {
                &[ChangeRequestStatus::Approved, ChangeRequestStatus::Rejected]
            }
            ChangeRequestStatus::Approved => &[ChangeRequestStatus::Implemented],
            ChangeRequestStatus::Rejected | ChangeRequestStatus::Implemented => &[],
        }
    }
}

/// Lifecycle rule violations
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid {entity} status transition: {from} → {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("New {entity} must start as {expected} (got {actual})")]
    InvalidInitialStatus {
        entity: &'static str,
        expected: String,
        actual: String,
    },

    #[error("A CAPA record cannot be CLOSED without a completion date")]
    MissingCompletionDate,

    #[error("completion_date is only recorded on CLOSED CAPA records (status is {status})")]
    PrematureCompletionDate { status: CapaStatus },

    #[error("completion_date {completion} is before the record was opened ({opened})")]
    CompletionBeforeOpened {
        completion: NaiveDate,
        opened: NaiveDate,
    },

    #[error("{field} {date} is before the submission date {submitted}")]
    DateBeforeSubmission {
        field: &'static str,
        date: NaiveDate,
        submitted: NaiveDate,
    },

    #[error("{field} is only recorded once a change request reaches {required}")]
    PrematureDate {
        field: &'static str,
        required: &'static str,
    },

    #[error("CAPA record {id} has no legal transition to {to} under strict policy")]
    Terminal { id: RecordId, to: CapaStatus },
}

/// Workflow engine for managing status transitions
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowEngine {
    policy: TransitionPolicy,
}

impl WorkflowEngine {
    pub fn new(policy: TransitionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    fn is_strict(&self) -> bool {
        self.policy == TransitionPolicy::Strict
    }

    /// Whether `from → to` appears in the transition table
    pub fn is_valid_transition<S: Lifecycle>(&self, from: S, to: S) -> bool {
        from.allowed_transitions().contains(&to)
    }

    /// Whether the engine accepts `from → to` under its policy
    pub fn can_transition<S: Lifecycle>(&self, from: S, to: S) -> bool {
        match self.policy {
            TransitionPolicy::Strict => self.is_valid_transition(from, to),
            TransitionPolicy::Permissive => true,
        }
    }

    /// Get allowed transitions from the current status
    pub fn allowed_transitions<S: Lifecycle>(&self, current: S) -> Vec<S> {
        current.allowed_transitions().to_vec()
    }

    pub fn check_transition<S: Lifecycle>(&self, from: S, to: S) -> Result<(), WorkflowError> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                entity: S::ENTITY,
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Under strict policy new records start at the head of their lifecycle
    pub fn check_initial_status<S: Lifecycle>(&self, status: S) -> Result<(), WorkflowError> {
        let expected = S::default();
        if self.is_strict() && status != expected {
            return Err(WorkflowError::InvalidInitialStatus {
                entity: S::ENTITY,
                expected: expected.to_string(),
                actual: status.to_string(),
            });
        }
        Ok(())
    }

    /// Date rules of a CAPA record in its current status
    pub fn validate_capa_dates(
        &self,
        status: CapaStatus,
        opened_on: NaiveDate,
        completion_date: Option<NaiveDate>,
    ) -> Result<(), WorkflowError> {
        if let Some(completion) = completion_date {
            if completion < opened_on {
                return Err(WorkflowError::CompletionBeforeOpened {
                    completion,
                    opened: opened_on,
                });
            }
        }

        if self.is_strict() {
            match (status, completion_date) {
                (CapaStatus::Closed, None) => return Err(WorkflowError::MissingCompletionDate),
                (CapaStatus::Closed, Some(_)) | (_, None) => {}
                (status, Some(_)) => return Err(WorkflowError::PrematureCompletionDate { status }),
            }
        }

        Ok(())
    }

    /// Move a CAPA record to `target`, recording `completion_date` if given.
    ///
    /// Leaving CLOSED drops the stored completion date.
    pub fn apply_capa_transition(
        &self,
        mut record: CapaRecord,
        target: CapaStatus,
        completion_date: Option<NaiveDate>,
    ) -> Result<CapaRecord, WorkflowError> {
        if self.is_strict() && record.capa_status.is_terminal() {
            return Err(WorkflowError::Terminal {
                id: record.id,
                to: target,
            });
        }
        self.check_transition(record.capa_status, target)?;

        if record.capa_status == CapaStatus::Closed && target != CapaStatus::Closed {
            record.completion_date = None;
        }
        record.capa_status = target;
        if completion_date.is_some() {
            record.completion_date = completion_date;
        }

        self.validate_capa_dates(record.capa_status, record.opened_on, record.completion_date)?;
        Ok(record)
    }

    /// Date rules of change request content in its current status
    pub fn validate_change_request_dates(
        &self,
        details: &ChangeRequestDetails,
    ) -> Result<(), WorkflowError> {
        let submitted = details.submission_date;
        for (field, date) in [
            ("evaluation_date", details.evaluation_date),
            ("implementation_date", details.implementation_date),
        ] {
            if let Some(date) = date {
                if date < submitted {
                    return Err(WorkflowError::DateBeforeSubmission {
                        field,
                        date,
                        submitted,
                    });
                }
            }
        }

        if self.is_strict() {
            let evaluated = matches!(
                details.change_request_status,
                ChangeRequestStatus::Approved
                    | ChangeRequestStatus::Rejected
                    | ChangeRequestStatus::Implemented
            );
            if details.evaluation_date.is_some() && !evaluated {
                return Err(WorkflowError::PrematureDate {
                    field: "evaluation_date",
                    required: "APPROVED or REJECTED",
                });
            }
            if details.implementation_date.is_some()
                && details.change_request_status != ChangeRequestStatus::Implemented
            {
                return Err(WorkflowError::PrematureDate {
                    field: "implementation_date",
                    required: "IMPLEMENTED",
                });
            }
        }

        Ok(())
    }

    /// Move a change request to `target` effective on `effective`.
    ///
    /// Reaching APPROVED or REJECTED stamps `evaluation_date`; reaching
    /// IMPLEMENTED stamps `implementation_date`. Existing stamps are kept.
    pub fn apply_change_request_transition(
        &self,
        mut request: ChangeRequest,
        target: ChangeRequestStatus,
        effective: NaiveDate,
    ) -> Result<ChangeRequest, WorkflowError> {
        self.check_transition(request.details.change_request_status, target)?;

        let details = &mut request.details;
        details.change_request_status = target;
        match target {
            ChangeRequestStatus::Approved | ChangeRequestStatus::Rejected => {
                details.evaluation_date.get_or_insert(effective);
            }
            ChangeRequestStatus::Implemented => {
                details.implementation_date.get_or_insert(effective);
            }
            ChangeRequestStatus::Submitted | ChangeRequestStatus::UnderReview => {}
        }

        self.validate_change_request_dates(details)?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::links::OriginRef;
    use crate::entities::capa::CapaSource;
    use crate::entities::change_request::AreaAffected;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn strict() -> WorkflowEngine {
        WorkflowEngine::new(TransitionPolicy::Strict)
    }

    fn permissive() -> WorkflowEngine {
        WorkflowEngine::new(TransitionPolicy::Permissive)
    }

    fn capa(status: CapaStatus) -> CapaRecord {
        CapaRecord {
            id: RecordId::new(1).unwrap(),
            issue_description: "Torque limit exceeded".to_string(),
            capa_source: CapaSource::AuditFindings,
            proposed_actions: String::new(),
            capa_status: status,
            assigned_personnel_id: RecordId::new(1).unwrap(),
            due_date: date("2025-01-01"),
            completion_date: None,
            opened_on: date("2024-12-01"),
            version: 1,
        }
    }

    fn change_request(status: ChangeRequestStatus) -> ChangeRequest {
        let mut details = ChangeRequestDetails::submitted(
            date("2025-02-01"),
            AreaAffected::Production,
            "New fixture",
        );
        details.change_request_status = status;
        ChangeRequest {
            id: RecordId::new(1).unwrap(),
            change_request_number: "CR-2025-0001".to_string(),
            origin: OriginRef::None,
            details,
            version: 1,
        }
    }

    #[test]
    fn test_capa_table_is_exact_under_strict() {
        let engine = strict();
        let legal = [
            (CapaStatus::Open, CapaStatus::UnderReview),
            (CapaStatus::UnderReview, CapaStatus::Approved),
            (CapaStatus::Approved, CapaStatus::Closed),
        ];
        for &from in CapaStatus::ALL {
            for &to in CapaStatus::ALL {
                assert_eq!(
                    engine.can_transition(from, to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_change_request_table_is_exact_under_strict() {
        use ChangeRequestStatus::*;
        let engine = strict();
        let legal = [
            (Submitted, UnderReview),
            (UnderReview, Approved),
            (UnderReview, Rejected),
            (Approved, Implemented),
        ];
        for &from in ChangeRequestStatus::ALL {
            for &to in ChangeRequestStatus::ALL {
                assert_eq!(
                    engine.can_transition(from, to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
        assert!(Rejected.is_terminal());
        assert!(Implemented.is_terminal());
    }

    #[test]
    fn test_permissive_accepts_any_move() {
        let engine = permissive();
        for &from in CapaStatus::ALL {
            for &to in CapaStatus::ALL {
                assert!(engine.can_transition(from, to));
            }
        }
        // The table itself does not change with policy
        assert!(!engine.is_valid_transition(CapaStatus::Open, CapaStatus::Closed));
    }

    #[test]
    fn test_allowed_transitions() {
        let engine = strict();
        assert_eq!(
            engine.allowed_transitions(CapaStatus::Open),
            vec![CapaStatus::UnderReview]
        );
        assert_eq!(
            engine.allowed_transitions(ChangeRequestStatus::UnderReview),
            vec![ChangeRequestStatus::Approved, ChangeRequestStatus::Rejected]
        );
        assert!(engine.allowed_transitions(CapaStatus::Closed).is_empty());
    }

    #[test]
    fn test_open_to_under_review_succeeds() {
        let record = strict()
            .apply_capa_transition(capa(CapaStatus::Open), CapaStatus::UnderReview, None)
            .unwrap();
        assert_eq!(record.capa_status, CapaStatus::UnderReview);
    }

    #[test]
    fn test_open_to_closed_fails_under_strict() {
        let err = strict()
            .apply_capa_transition(
                capa(CapaStatus::Open),
                CapaStatus::Closed,
                Some(date("2025-01-02")),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn test_closing_requires_completion_date_under_strict() {
        let err = strict()
            .apply_capa_transition(capa(CapaStatus::Approved), CapaStatus::Closed, None)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingCompletionDate));

        let closed = strict()
            .apply_capa_transition(
                capa(CapaStatus::Approved),
                CapaStatus::Closed,
                Some(date("2024-12-20")),
            )
            .unwrap();
        assert_eq!(closed.completion_date, Some(date("2024-12-20")));
    }

    #[test]
    fn test_permissive_close_stores_supplied_date() {
        let closed = permissive()
            .apply_capa_transition(
                capa(CapaStatus::Open),
                CapaStatus::Closed,
                Some(date("2025-01-05")),
            )
            .unwrap();
        assert_eq!(closed.capa_status, CapaStatus::Closed);
        assert_eq!(closed.completion_date, Some(date("2025-01-05")));

        let undated = permissive()
            .apply_capa_transition(capa(CapaStatus::Open), CapaStatus::Closed, None)
            .unwrap();
        assert!(undated.completion_date.is_none());
    }

    #[test]
    fn test_no_regression_from_closed() {
        let mut record = capa(CapaStatus::Closed);
        record.completion_date = Some(date("2024-12-31"));
        let err = strict()
            .apply_capa_transition(record, CapaStatus::Open, None)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Terminal { .. }));
    }

    #[test]
    fn test_reopening_drops_completion_date() {
        let mut record = capa(CapaStatus::Closed);
        record.completion_date = Some(date("2024-12-31"));
        let reopened = permissive()
            .apply_capa_transition(record, CapaStatus::Open, None)
            .unwrap();
        assert_eq!(reopened.capa_status, CapaStatus::Open);
        assert_eq!(reopened.completion_date, None);

        // The reopened record stays valid if the policy tightens again
        assert!(strict()
            .validate_capa_dates(reopened.capa_status, reopened.opened_on, reopened.completion_date)
            .is_ok());
        let reviewed = strict()
            .apply_capa_transition(reopened, CapaStatus::UnderReview, None)
            .unwrap();
        assert_eq!(reviewed.capa_status, CapaStatus::UnderReview);
    }

    #[test]
    fn test_completion_never_before_opening() {
        for engine in [strict(), permissive()] {
            let err = engine
                .apply_capa_transition(
                    capa(CapaStatus::Approved),
                    CapaStatus::Closed,
                    Some(date("2024-11-30")),
                )
                .unwrap_err();
            assert!(matches!(err, WorkflowError::CompletionBeforeOpened { .. }));
        }
    }

    #[test]
    fn test_completion_date_only_on_closed_under_strict() {
        let err = strict()
            .validate_capa_dates(CapaStatus::Open, date("2024-12-01"), Some(date("2024-12-05")))
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::PrematureCompletionDate { status: CapaStatus::Open }
        ));
        assert!(permissive()
            .validate_capa_dates(CapaStatus::Open, date("2024-12-01"), Some(date("2024-12-05")))
            .is_ok());
    }

    #[test]
    fn test_initial_status() {
        assert!(strict().check_initial_status(CapaStatus::Open).is_ok());
        assert!(matches!(
            strict().check_initial_status(CapaStatus::Approved),
            Err(WorkflowError::InvalidInitialStatus { .. })
        ));
        assert!(permissive().check_initial_status(CapaStatus::Approved).is_ok());
        assert!(strict()
            .check_initial_status(ChangeRequestStatus::Submitted)
            .is_ok());
    }

    #[test]
    fn test_change_request_transitions_stamp_dates() {
        let engine = strict();
        let reviewed = engine
            .apply_change_request_transition(
                change_request(ChangeRequestStatus::Submitted),
                ChangeRequestStatus::UnderReview,
                date("2025-02-03"),
            )
            .unwrap();
        assert!(reviewed.details.evaluation_date.is_none());

        let approved = engine
            .apply_change_request_transition(
                reviewed,
                ChangeRequestStatus::Approved,
                date("2025-02-10"),
            )
            .unwrap();
        assert_eq!(approved.details.evaluation_date, Some(date("2025-02-10")));

        let implemented = engine
            .apply_change_request_transition(
                approved,
                ChangeRequestStatus::Implemented,
                date("2025-03-01"),
            )
            .unwrap();
        assert_eq!(implemented.details.evaluation_date, Some(date("2025-02-10")));
        assert_eq!(
            implemented.details.implementation_date,
            Some(date("2025-03-01"))
        );
    }

    #[test]
    fn test_rejected_is_terminal() {
        let err = strict()
            .apply_change_request_transition(
                change_request(ChangeRequestStatus::Rejected),
                ChangeRequestStatus::Implemented,
                date("2025-03-01"),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn test_effective_date_before_submission() {
        let err = strict()
            .apply_change_request_transition(
                change_request(ChangeRequestStatus::UnderReview),
                ChangeRequestStatus::Rejected,
                date("2025-01-15"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::DateBeforeSubmission { field: "evaluation_date", .. }
        ));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "Permissive".parse::<TransitionPolicy>().unwrap(),
            TransitionPolicy::Permissive
        );
        assert!("lenient".parse::<TransitionPolicy>().is_err());
    }
}
