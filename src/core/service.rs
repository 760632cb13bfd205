//! Core-facing operations over CAPA records and change requests
//!
//! [`CapaService`] is the single entry point callers use. Every write runs the
//! same pipeline: field validation, then the [`WorkflowEngine`], then the
//! [`RelationshipResolver`], then one store call. Listing goes through the
//! [`QueryBuilder`] first, so a rejected filter never reaches the store.

use std::ops::ControlFlow;

use chrono::{Datelike, NaiveDate};

use crate::core::entity::EntityKind;
use crate::core::error::{require_text, CapaError, Result};
use crate::core::identity::RecordId;
use crate::core::links::{self, OriginRef, RelationshipResolver};
use crate::core::query::{Filters, QueryBuilder, SortKey};
use crate::core::store::{RecordStore, StoreError};
use crate::core::workflow::WorkflowEngine;
use crate::entities::capa::{CapaPatch, CapaRecord, CapaStatus, NewCapaRecord};
use crate::entities::change_request::{
    format_change_request_number, ChangeRequest, ChangeRequestStatus, NewChangeRequest,
};
use crate::entities::deviation::{DeviationRecord, NewDeviation};
use crate::entities::filter_options::{FilterPreference, FilterSettings};
use crate::entities::personnel::{NewPersonnel, Personnel};

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
    pub sort: SortKey,
}

impl PageRequest {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page,
            page_size,
            sort: SortKey::default(),
        }
    }

    pub fn sorted_by(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }
}

/// CAPA and change-request operations over a record store
pub struct CapaService<S> {
    store: S,
    engine: WorkflowEngine,
    queries: QueryBuilder,
}

impl<S: RecordStore> CapaService<S> {
    pub fn new(store: S, engine: WorkflowEngine, queries: QueryBuilder) -> Self {
        Self {
            store,
            engine,
            queries,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> WorkflowEngine {
        self.engine
    }

    fn resolver(&self) -> RelationshipResolver<'_, S> {
        RelationshipResolver::new(&self.store)
    }

    // =====================================================================
    // CAPA records
    // =====================================================================

    pub fn create_capa_record(&self, record: NewCapaRecord) -> Result<RecordId> {
        require_text("issue_description", &record.issue_description)?;
        self.engine.check_initial_status(record.capa_status)?;
        self.engine
            .validate_capa_dates(record.capa_status, record.opened_on, record.completion_date)?;
        self.resolver()
            .require(EntityKind::Personnel, record.assigned_personnel_id)?;

        Ok(self.store.insert_capa_record(&record)?)
    }

    pub fn get_capa_record(&self, id: RecordId) -> Result<CapaRecord> {
        self.store
            .get_capa_record(id)?
            .ok_or_else(|| not_found(EntityKind::Capa, id))
    }

    pub fn list_capa_records(&self, filters: &Filters, page: &PageRequest) -> Result<Vec<CapaRecord>> {
        let query =
            self.queries
                .build::<CapaRecord>(filters, page.page, page.page_size, &page.sort)?;
        Ok(self.store.query_capa_records(&query)?)
    }

    /// Stream one page to `visit`; returning `Break` stops reading early
    pub fn for_each_capa_record<F>(
        &self,
        filters: &Filters,
        page: &PageRequest,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(CapaRecord) -> ControlFlow<()>,
    {
        let query =
            self.queries
                .build::<CapaRecord>(filters, page.page, page.page_size, &page.sort)?;
        Ok(self.store.scan_capa_records(&query, &mut visit)?)
    }

    /// Apply the fields set in `patch`.
    ///
    /// A status change in the patch is checked like an explicit transition.
    /// Returns the stored record; an empty or unchanged patch writes nothing.
    pub fn update_capa_record(
        &self,
        id: RecordId,
        patch: CapaPatch,
        expected_version: Option<u32>,
    ) -> Result<CapaRecord> {
        let current = self.get_capa_record(id)?;
        check_version(EntityKind::Capa, id, current.version, expected_version)?;

        if let Some(text) = &patch.issue_description {
            require_text("issue_description", text)?;
        }
        if let Some(person) = patch.assigned_personnel_id {
            if person != current.assigned_personnel_id {
                self.resolver().require(EntityKind::Personnel, person)?;
            }
        }

        let completion = patch.completion_date;
        let mut next = current.clone();
        patch.apply_to(&mut next);

        let next = if next.capa_status != current.capa_status {
            let target = next.capa_status;
            next.capa_status = current.capa_status;
            next.completion_date = current.completion_date;
            let mut moved = self
                .engine
                .apply_capa_transition(next, target, completion.flatten())?;
            if completion == Some(None) {
                moved.completion_date = None;
                self.engine
                    .validate_capa_dates(moved.capa_status, moved.opened_on, None)?;
            }
            moved
        } else {
            self.engine
                .validate_capa_dates(next.capa_status, next.opened_on, next.completion_date)?;
            next
        };

        self.write_capa(current, next)
    }

    /// Move a CAPA record to `target`. Closing takes the completion date.
    pub fn transition_capa_status(
        &self,
        id: RecordId,
        target: CapaStatus,
        completion_date: Option<NaiveDate>,
        expected_version: Option<u32>,
    ) -> Result<CapaRecord> {
        let current = self.get_capa_record(id)?;
        check_version(EntityKind::Capa, id, current.version, expected_version)?;

        if current.capa_status == target {
            return Ok(current);
        }

        let next = self
            .engine
            .apply_capa_transition(current.clone(), target, completion_date)?;
        self.write_capa(current, next)
    }

    fn write_capa(&self, current: CapaRecord, mut next: CapaRecord) -> Result<CapaRecord> {
        if next == current {
            return Ok(current);
        }
        next.version = self
            .store
            .update_capa_record(&next, Some(current.version))?;
        Ok(next)
    }

    // =====================================================================
    // Change requests
    // =====================================================================

    /// Store a new change request; a missing number is generated from the
    /// submission year
    pub fn create_change_request(&self, request: NewChangeRequest) -> Result<RecordId> {
        let details = &request.details;
        require_text("reason_for_change", &details.reason_for_change)?;
        self.engine
            .check_initial_status(details.change_request_status)?;
        self.engine.validate_change_request_dates(details)?;

        let origin = self
            .resolver()
            .resolve(request.deviation_id, request.capa_id)?;

        let number = match &request.change_request_number {
            Some(number) => {
                require_text("change_request_number", number)?;
                number.trim().to_string()
            }
            None => {
                let year = details.submission_date.year();
                let highest = self.store.highest_change_request_serial(year)?;
                format_change_request_number(year, highest.saturating_add(1))
            }
        };

        Ok(self
            .store
            .insert_change_request(&number, origin, details)?)
    }

    pub fn get_change_request(&self, id: RecordId) -> Result<ChangeRequest> {
        self.store
            .get_change_request(id)?
            .ok_or_else(|| not_found(EntityKind::ChangeRequest, id))
    }

    pub fn list_change_requests(
        &self,
        filters: &Filters,
        page: &PageRequest,
    ) -> Result<Vec<ChangeRequest>> {
        let query =
            self.queries
                .build::<ChangeRequest>(filters, page.page, page.page_size, &page.sort)?;
        Ok(self.store.query_change_requests(&query)?)
    }

    /// Move a change request to `target`, stamping evaluation or
    /// implementation dates with `effective`
    pub fn transition_change_request_status(
        &self,
        id: RecordId,
        target: ChangeRequestStatus,
        effective: NaiveDate,
        expected_version: Option<u32>,
    ) -> Result<ChangeRequest> {
        let current = self.get_change_request(id)?;
        check_version(EntityKind::ChangeRequest, id, current.version, expected_version)?;

        if current.details.change_request_status == target {
            return Ok(current);
        }

        let next = self
            .engine
            .apply_change_request_transition(current.clone(), target, effective)?;
        self.write_change_request(current, next)
    }

    /// Point a change request at a deviation, a CAPA, or nothing
    pub fn attach_change_request(
        &self,
        id: RecordId,
        deviation: Option<RecordId>,
        capa: Option<RecordId>,
        expected_version: Option<u32>,
    ) -> Result<ChangeRequest> {
        let current = self.get_change_request(id)?;
        check_version(EntityKind::ChangeRequest, id, current.version, expected_version)?;

        let mut next = current.clone();
        self.resolver().attach(&mut next, deviation, capa)?;
        self.write_change_request(current, next)
    }

    pub fn resolve_origin(&self, id: RecordId) -> Result<OriginRef> {
        Ok(links::resolve_origin(&self.get_change_request(id)?))
    }

    pub fn change_requests_for_capa(&self, capa: RecordId) -> Result<Vec<ChangeRequest>> {
        self.resolver().require(EntityKind::Capa, capa)?;
        Ok(self.store.change_requests_by_origin(OriginRef::Capa(capa))?)
    }

    pub fn change_requests_for_deviation(
        &self,
        deviation: RecordId,
    ) -> Result<Vec<ChangeRequest>> {
        self.resolver().require(EntityKind::Deviation, deviation)?;
        Ok(self
            .store
            .change_requests_by_origin(OriginRef::Deviation(deviation))?)
    }

    fn write_change_request(
        &self,
        current: ChangeRequest,
        mut next: ChangeRequest,
    ) -> Result<ChangeRequest> {
        if next == current {
            return Ok(current);
        }
        next.version = self
            .store
            .update_change_request(&next, Some(current.version))?;
        Ok(next)
    }

    // =====================================================================
    // Referenced records
    // =====================================================================

    pub fn add_personnel(&self, person: NewPersonnel) -> Result<RecordId> {
        require_text("name", &person.name)?;
        if let Some(email) = &person.email {
            if !email.contains('@') {
                return Err(CapaError::validation(
                    "email",
                    format!("'{}' is not an email address", email),
                ));
            }
        }
        Ok(self.store.insert_personnel(&person)?)
    }

    pub fn list_personnel(&self) -> Result<Vec<Personnel>> {
        Ok(self.store.list_personnel()?)
    }

    pub fn add_deviation(&self, deviation: NewDeviation) -> Result<RecordId> {
        require_text("deviation_number", &deviation.deviation_number)?;
        require_text("description", &deviation.description)?;
        Ok(self.store.insert_deviation(&deviation)?)
    }

    pub fn list_deviations(&self) -> Result<Vec<DeviationRecord>> {
        Ok(self.store.list_deviations()?)
    }

    // =====================================================================
    // Saved views
    // =====================================================================

    /// Save a view for `user_id` after checking it expands to a valid listing
    pub fn save_filter_preference(
        &self,
        user_id: RecordId,
        settings: &FilterSettings,
    ) -> Result<RecordId> {
        let filters = settings.to_filters()?;
        self.queries
            .build::<CapaRecord>(&filters, 1, 1, &SortKey::default())?;
        Ok(self.store.insert_filter_preference(user_id, settings)?)
    }

    pub fn latest_filter_preference(&self, user_id: RecordId) -> Result<Option<FilterPreference>> {
        Ok(self.store.latest_filter_preference(user_id)?)
    }

    /// The filter map of the user's latest view, if one was saved
    pub fn saved_filters(&self, user_id: RecordId) -> Result<Option<Filters>> {
        self.latest_filter_preference(user_id)?
            .map(|pref| pref.settings.to_filters())
            .transpose()
    }
}

fn not_found(entity: EntityKind, id: RecordId) -> CapaError {
    StoreError::NotFound { entity, id }.into()
}

fn check_version(
    entity: EntityKind,
    id: RecordId,
    actual: u32,
    expected: Option<u32>,
) -> Result<()> {
    match expected {
        Some(expected) if expected != actual => Err(StoreError::Conflict {
            entity,
            reason: format!("{} {} is at version {}, expected {}", entity, id, actual, expected),
        }
        .into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::links::RelationshipError;
    use crate::core::query::{PreparedQuery, QueryError};
    use crate::core::store::{CapaStore, ChangeRequestStore, ReferenceStore, SqliteStore};
    use crate::core::workflow::{TransitionPolicy, WorkflowError};
    use crate::entities::capa::CapaSource;
    use crate::entities::change_request::{AreaAffected, ChangeRequestDetails};
    use crate::entities::filter_options::TriggerSource;
    use std::cell::Cell;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn service(policy: TransitionPolicy) -> CapaService<SqliteStore> {
        CapaService::new(
            SqliteStore::open_in_memory().unwrap(),
            WorkflowEngine::new(policy),
            QueryBuilder::new(100),
        )
    }

    fn person(svc: &CapaService<SqliteStore>) -> RecordId {
        svc.add_personnel(NewPersonnel {
            name: "Priya Natarajan".to_string(),
            email: Some("priya@example.com".to_string()),
        })
        .unwrap()
    }

    fn capa(person: RecordId, source: CapaSource, due: &str) -> NewCapaRecord {
        let mut record = NewCapaRecord::new("Burr on housing edge", source, person, date(due));
        record.opened_on = date("2024-12-01");
        record
    }

    fn filters(pairs: &[(&str, &str)]) -> Filters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Every call fails as unavailable; counts how many reached it
    #[derive(Default)]
    struct FailingStore {
        calls: Cell<usize>,
    }

    impl FailingStore {
        fn fail<T>(&self) -> std::result::Result<T, StoreError> {
            self.calls.set(self.calls.get() + 1);
            Err(StoreError::Unavailable { operation: "test" })
        }
    }

    impl CapaStore for FailingStore {
        fn insert_capa_record(&self, _: &NewCapaRecord) -> std::result::Result<RecordId, StoreError> {
            self.fail()
        }
        fn get_capa_record(&self, _: RecordId) -> std::result::Result<Option<CapaRecord>, StoreError> {
            self.fail()
        }
        fn update_capa_record(&self, _: &CapaRecord, _: Option<u32>) -> std::result::Result<u32, StoreError> {
            self.fail()
        }
        fn scan_capa_records(
            &self,
            _: &PreparedQuery<CapaRecord>,
            _: &mut dyn FnMut(CapaRecord) -> ControlFlow<()>,
        ) -> std::result::Result<(), StoreError> {
            self.fail()
        }
    }

    impl ChangeRequestStore for FailingStore {
        fn insert_change_request(
            &self,
            _: &str,
            _: OriginRef,
            _: &ChangeRequestDetails,
        ) -> std::result::Result<RecordId, StoreError> {
            self.fail()
        }
        fn get_change_request(&self, _: RecordId) -> std::result::Result<Option<ChangeRequest>, StoreError> {
            self.fail()
        }
        fn update_change_request(&self, _: &ChangeRequest, _: Option<u32>) -> std::result::Result<u32, StoreError> {
            self.fail()
        }
        fn scan_change_requests(
            &self,
            _: &PreparedQuery<ChangeRequest>,
            _: &mut dyn FnMut(ChangeRequest) -> ControlFlow<()>,
        ) -> std::result::Result<(), StoreError> {
            self.fail()
        }
        fn change_requests_by_origin(&self, _: OriginRef) -> std::result::Result<Vec<ChangeRequest>, StoreError> {
            self.fail()
        }
        fn highest_change_request_serial(&self, _: i32) -> std::result::Result<u32, StoreError> {
            self.fail()
        }
    }

    impl ReferenceStore for FailingStore {
        fn exists(&self, _: EntityKind, _: RecordId) -> std::result::Result<bool, StoreError> {
            self.fail()
        }
        fn insert_personnel(&self, _: &NewPersonnel) -> std::result::Result<RecordId, StoreError> {
            self.fail()
        }
        fn list_personnel(&self) -> std::result::Result<Vec<Personnel>, StoreError> {
            self.fail()
        }
        fn insert_deviation(&self, _: &NewDeviation) -> std::result::Result<RecordId, StoreError> {
            self.fail()
        }
        fn list_deviations(&self) -> std::result::Result<Vec<DeviationRecord>, StoreError> {
            self.fail()
        }
        fn insert_filter_preference(
            &self,
            _: RecordId,
            _: &FilterSettings,
        ) -> std::result::Result<RecordId, StoreError> {
            self.fail()
        }
        fn latest_filter_preference(
            &self,
            _: RecordId,
        ) -> std::result::Result<Option<FilterPreference>, StoreError> {
            self.fail()
        }
    }

    fn failing() -> CapaService<FailingStore> {
        CapaService::new(
            FailingStore::default(),
            WorkflowEngine::default(),
            QueryBuilder::new(100),
        )
    }

    #[test]
    fn test_unknown_filter_never_reaches_store() {
        let svc = failing();
        let err = svc
            .list_capa_records(&filters(&[("owner_name", "x")]), &PageRequest::new(1, 10))
            .unwrap_err();
        assert!(matches!(err, CapaError::Query(QueryError::UnknownFilterField { .. })));

        let err = svc
            .list_capa_records(&Filters::new(), &PageRequest::new(1, 0))
            .unwrap_err();
        assert!(matches!(err, CapaError::Query(QueryError::InvalidPageSize { .. })));
        assert_eq!(svc.store().calls.get(), 0);
    }

    #[test]
    fn test_unavailable_store_is_retryable() {
        let svc = failing();
        let err = svc
            .list_capa_records(&Filters::new(), &PageRequest::new(1, 10))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(svc.store().calls.get(), 1);
    }

    #[test]
    fn test_create_then_read_round_trip() {
        let svc = service(TransitionPolicy::Strict);
        let owner = person(&svc);
        let mut new = capa(owner, CapaSource::AuditFindings, "2025-01-01");
        new.proposed_actions = "Deburr fixture and retrain operators".to_string();

        let id = svc.create_capa_record(new.clone()).unwrap();
        let stored = svc.get_capa_record(id).unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.issue_description, new.issue_description);
        assert_eq!(stored.capa_source, new.capa_source);
        assert_eq!(stored.proposed_actions, new.proposed_actions);
        assert_eq!(stored.capa_status, new.capa_status);
        assert_eq!(stored.assigned_personnel_id, new.assigned_personnel_id);
        assert_eq!(stored.due_date, new.due_date);
        assert_eq!(stored.completion_date, new.completion_date);
        assert_eq!(stored.opened_on, new.opened_on);
    }

    #[test]
    fn test_audit_finding_scenario() {
        let svc = service(TransitionPolicy::Strict);
        let owner = person(&svc);
        let id = svc
            .create_capa_record(capa(owner, CapaSource::AuditFindings, "2025-01-01"))
            .unwrap();

        let err = svc
            .transition_capa_status(id, CapaStatus::Closed, Some(date("2025-01-01")), None)
            .unwrap_err();
        assert!(matches!(
            err,
            CapaError::Transition(WorkflowError::InvalidTransition { .. })
        ));

        let record = svc
            .transition_capa_status(id, CapaStatus::UnderReview, None, None)
            .unwrap();
        assert_eq!(record.capa_status, CapaStatus::UnderReview);
        assert_eq!(record.version, 2);
        assert_eq!(svc.get_capa_record(id).unwrap(), record);
    }

    #[test]
    fn test_close_requires_completion_date_when_strict() {
        let svc = service(TransitionPolicy::Strict);
        let owner = person(&svc);
        let id = svc
            .create_capa_record(capa(owner, CapaSource::Deviations, "2025-01-01"))
            .unwrap();
        svc.transition_capa_status(id, CapaStatus::UnderReview, None, None)
            .unwrap();
        svc.transition_capa_status(id, CapaStatus::Approved, None, None)
            .unwrap();

        let err = svc
            .transition_capa_status(id, CapaStatus::Closed, None, None)
            .unwrap_err();
        assert!(matches!(
            err,
            CapaError::Transition(WorkflowError::MissingCompletionDate)
        ));

        let closed = svc
            .transition_capa_status(id, CapaStatus::Closed, Some(date("2025-01-20")), None)
            .unwrap();
        assert_eq!(closed.completion_date, Some(date("2025-01-20")));
    }

    #[test]
    fn test_permissive_close_stores_supplied_date() {
        let svc = service(TransitionPolicy::Permissive);
        let owner = person(&svc);
        let id = svc
            .create_capa_record(capa(owner, CapaSource::Deviations, "2025-01-01"))
            .unwrap();

        svc.transition_capa_status(id, CapaStatus::Closed, Some(date("2025-02-02")), None)
            .unwrap();
        let stored = svc.get_capa_record(id).unwrap();
        assert_eq!(stored.capa_status, CapaStatus::Closed);
        assert_eq!(stored.completion_date, Some(date("2025-02-02")));
    }

    #[test]
    fn test_same_status_is_a_no_op() {
        let svc = service(TransitionPolicy::Strict);
        let owner = person(&svc);
        let id = svc
            .create_capa_record(capa(owner, CapaSource::Deviations, "2025-01-01"))
            .unwrap();

        let record = svc
            .transition_capa_status(id, CapaStatus::Open, None, None)
            .unwrap();
        assert_eq!(record.version, 1);

        let record = svc
            .update_capa_record(id, CapaPatch::default(), None)
            .unwrap();
        assert_eq!(record.version, 1);
    }

    #[test]
    fn test_patch_status_goes_through_engine() {
        let svc = service(TransitionPolicy::Strict);
        let owner = person(&svc);
        let id = svc
            .create_capa_record(capa(owner, CapaSource::Deviations, "2025-01-01"))
            .unwrap();

        let skip = CapaPatch {
            capa_status: Some(CapaStatus::Approved),
            ..Default::default()
        };
        assert!(matches!(
            svc.update_capa_record(id, skip, None),
            Err(CapaError::Transition(WorkflowError::InvalidTransition { .. }))
        ));

        let patch = CapaPatch {
            capa_status: Some(CapaStatus::UnderReview),
            proposed_actions: Some("Replace deburring tool".to_string()),
            due_date: Some(date("2025-02-15")),
            ..Default::default()
        };
        let record = svc.update_capa_record(id, patch, Some(1)).unwrap();
        assert_eq!(record.capa_status, CapaStatus::UnderReview);
        assert_eq!(record.proposed_actions, "Replace deburring tool");
        assert_eq!(record.due_date, date("2025-02-15"));
        assert_eq!(record.version, 2);
    }

    #[test]
    fn test_completion_date_can_be_cleared() {
        let svc = service(TransitionPolicy::Permissive);
        let owner = person(&svc);
        let id = svc
            .create_capa_record(capa(owner, CapaSource::Deviations, "2025-01-01"))
            .unwrap();
        let dated = CapaPatch {
            completion_date: Some(Some(date("2025-02-01"))),
            ..Default::default()
        };
        let record = svc.update_capa_record(id, dated, None).unwrap();
        assert_eq!(record.capa_status, CapaStatus::Open);
        assert_eq!(record.completion_date, Some(date("2025-02-01")));

        let clear = CapaPatch {
            completion_date: Some(None),
            ..Default::default()
        };
        let record = svc.update_capa_record(id, clear, None).unwrap();
        assert_eq!(record.completion_date, None);
    }

    #[test]
    fn test_reopened_record_survives_strict_policy() {
        let permissive = service(TransitionPolicy::Permissive);
        let owner = person(&permissive);
        let id = permissive
            .create_capa_record(capa(owner, CapaSource::Deviations, "2025-01-01"))
            .unwrap();
        permissive
            .transition_capa_status(id, CapaStatus::Closed, Some(date("2025-02-01")), None)
            .unwrap();
        let reopened = permissive
            .transition_capa_status(id, CapaStatus::Open, None, None)
            .unwrap();
        assert_eq!(reopened.completion_date, None);

        let strict = CapaService::new(
            permissive.store,
            WorkflowEngine::new(TransitionPolicy::Strict),
            QueryBuilder::new(100),
        );
        let record = strict
            .transition_capa_status(id, CapaStatus::UnderReview, None, None)
            .unwrap();
        assert_eq!(record.capa_status, CapaStatus::UnderReview);
    }

    #[test]
    fn test_stale_version_conflicts() {
        let svc = service(TransitionPolicy::Strict);
        let owner = person(&svc);
        let id = svc
            .create_capa_record(capa(owner, CapaSource::Deviations, "2025-01-01"))
            .unwrap();
        svc.transition_capa_status(id, CapaStatus::UnderReview, None, Some(1))
            .unwrap();

        let patch = CapaPatch {
            proposed_actions: Some("Late edit".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            svc.update_capa_record(id, patch, Some(1)),
            Err(CapaError::Store(StoreError::Conflict { .. }))
        ));
    }

    #[test]
    fn test_create_validates_references_and_text() {
        let svc = service(TransitionPolicy::Strict);
        let ghost = RecordId::new(404).unwrap();
        let err = svc
            .create_capa_record(capa(ghost, CapaSource::Deviations, "2025-01-01"))
            .unwrap_err();
        assert!(matches!(
            err,
            CapaError::Relationship(RelationshipError::DanglingReference {
                entity: EntityKind::Personnel,
                ..
            })
        ));

        let owner = person(&svc);
        let mut blank = capa(owner, CapaSource::Deviations, "2025-01-01");
        blank.issue_description = "   ".to_string();
        assert!(matches!(
            svc.create_capa_record(blank),
            Err(CapaError::Validation { ref field, .. }) if field == "issue_description"
        ));

        let mut approved = capa(owner, CapaSource::Deviations, "2025-01-01");
        approved.capa_status = CapaStatus::Approved;
        assert!(matches!(
            svc.create_capa_record(approved),
            Err(CapaError::Transition(WorkflowError::InvalidInitialStatus { .. }))
        ));
    }

    #[test]
    fn test_missing_record_is_not_found() {
        let svc = service(TransitionPolicy::Strict);
        let err = svc.get_capa_record(RecordId::new(9).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            CapaError::Store(StoreError::NotFound {
                entity: EntityKind::Capa,
                ..
            })
        ));
    }

    #[test]
    fn test_empty_table_closed_filter_returns_empty() {
        let svc = service(TransitionPolicy::Strict);
        let records = svc
            .list_capa_records(
                &filters(&[("capa_status", "CLOSED")]),
                &PageRequest::new(1, 10),
            )
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_pages_are_disjoint_and_contiguous() {
        let svc = service(TransitionPolicy::Strict);
        let owner = person(&svc);
        // Repeated due dates exercise the id tie-break
        for due in [
            "2025-03-01", "2025-01-01", "2025-02-01", "2025-01-01", "2025-02-01", "2025-03-01",
            "2025-01-15",
        ] {
            svc.create_capa_record(capa(owner, CapaSource::Deviations, due))
                .unwrap();
        }
        let sort: SortKey = "due_date".parse().unwrap();

        let all = svc
            .list_capa_records(&Filters::new(), &PageRequest::new(1, 100).sorted_by(sort.clone()))
            .unwrap();
        assert_eq!(all.len(), 7);

        let first = svc
            .list_capa_records(&Filters::new(), &PageRequest::new(1, 3).sorted_by(sort.clone()))
            .unwrap();
        let second = svc
            .list_capa_records(&Filters::new(), &PageRequest::new(2, 3).sorted_by(sort.clone()))
            .unwrap();
        let beyond = svc
            .list_capa_records(&Filters::new(), &PageRequest::new(5, 3).sorted_by(sort))
            .unwrap();

        let joined: Vec<_> = first.iter().chain(second.iter()).cloned().collect();
        assert_eq!(joined, all[..6].to_vec());
        assert!(beyond.is_empty());
    }

    #[test]
    fn test_for_each_stops_early() {
        let svc = service(TransitionPolicy::Strict);
        let owner = person(&svc);
        for due in ["2025-01-01", "2025-02-01", "2025-03-01"] {
            svc.create_capa_record(capa(owner, CapaSource::Deviations, due))
                .unwrap();
        }

        let mut seen = 0;
        svc.for_each_capa_record(&Filters::new(), &PageRequest::new(1, 10), |_| {
            seen += 1;
            ControlFlow::Break(())
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    fn details(reason: &str) -> ChangeRequestDetails {
        ChangeRequestDetails::submitted(date("2025-03-03"), AreaAffected::Production, reason)
    }

    #[test]
    fn test_change_request_numbers_and_lifecycle() {
        let svc = service(TransitionPolicy::Strict);
        let first = svc
            .create_change_request(NewChangeRequest::new(details("New gauge")))
            .unwrap();
        let second = svc
            .create_change_request(NewChangeRequest::new(details("Revised SOP")))
            .unwrap();

        assert_eq!(
            svc.get_change_request(first).unwrap().change_request_number,
            "CR-2025-0001"
        );
        assert_eq!(
            svc.get_change_request(second).unwrap().change_request_number,
            "CR-2025-0002"
        );

        let err = svc
            .transition_change_request_status(
                first,
                ChangeRequestStatus::Implemented,
                date("2025-03-10"),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, CapaError::Transition(_)));

        svc.transition_change_request_status(
            first,
            ChangeRequestStatus::UnderReview,
            date("2025-03-04"),
            None,
        )
        .unwrap();
        let approved = svc
            .transition_change_request_status(
                first,
                ChangeRequestStatus::Approved,
                date("2025-03-05"),
                None,
            )
            .unwrap();
        assert_eq!(approved.details.evaluation_date, Some(date("2025-03-05")));
        assert_eq!(approved.details.implementation_date, None);
        assert_eq!(svc.get_change_request(first).unwrap(), approved);
    }

    #[test]
    fn test_generated_number_follows_manual_numbers() {
        let svc = service(TransitionPolicy::Strict);
        let mut manual = NewChangeRequest::new(details("Fixture rework"));
        manual.change_request_number = Some("CR-2025-0002".to_string());
        svc.create_change_request(manual).unwrap();

        let generated = svc
            .create_change_request(NewChangeRequest::new(details("Label update")))
            .unwrap();
        assert_eq!(
            svc.get_change_request(generated).unwrap().change_request_number,
            "CR-2025-0003"
        );

        let next = svc
            .create_change_request(NewChangeRequest::new(details("Second label update")))
            .unwrap();
        assert_eq!(
            svc.get_change_request(next).unwrap().change_request_number,
            "CR-2025-0004"
        );
    }

    #[test]
    fn test_attach_and_reverse_lookup() {
        let svc = service(TransitionPolicy::Strict);
        let owner = person(&svc);
        let capa_id = svc
            .create_capa_record(capa(owner, CapaSource::Deviations, "2025-01-01"))
            .unwrap();
        let deviation = svc
            .add_deviation(NewDeviation {
                deviation_number: "DEV-0009".to_string(),
                description: "Wrong resin lot".to_string(),
                reported_on: date("2025-02-20"),
            })
            .unwrap();
        let cr = svc
            .create_change_request(NewChangeRequest::new(details("Supplier switch")))
            .unwrap();

        let err = svc
            .attach_change_request(cr, Some(deviation), Some(capa_id), None)
            .unwrap_err();
        assert!(matches!(
            err,
            CapaError::Relationship(RelationshipError::AmbiguousOrigin { .. })
        ));
        assert_eq!(svc.resolve_origin(cr).unwrap(), OriginRef::None);

        svc.attach_change_request(cr, None, Some(capa_id), None)
            .unwrap();
        assert_eq!(svc.resolve_origin(cr).unwrap(), OriginRef::Capa(capa_id));
        assert_eq!(svc.change_requests_for_capa(capa_id).unwrap().len(), 1);
        assert!(svc
            .change_requests_for_deviation(deviation)
            .unwrap()
            .is_empty());

        svc.attach_change_request(cr, None, None, None).unwrap();
        assert_eq!(svc.resolve_origin(cr).unwrap(), OriginRef::None);
    }

    #[test]
    fn test_create_change_request_with_origin() {
        let svc = service(TransitionPolicy::Strict);
        let deviation = svc
            .add_deviation(NewDeviation {
                deviation_number: "DEV-0001".to_string(),
                description: "Seal leak".to_string(),
                reported_on: date("2025-03-01"),
            })
            .unwrap();

        let mut request = NewChangeRequest::new(details("Gasket redesign"));
        request.deviation_id = Some(deviation);
        request.change_request_number = Some(" CR-X-1 ".to_string());
        let id = svc.create_change_request(request).unwrap();

        let stored = svc.get_change_request(id).unwrap();
        assert_eq!(stored.change_request_number, "CR-X-1");
        assert_eq!(stored.origin, OriginRef::Deviation(deviation));
        assert_eq!(svc.change_requests_for_deviation(deviation).unwrap().len(), 1);

        let mut dangling = NewChangeRequest::new(details("Ghost"));
        dangling.capa_id = Some(RecordId::new(77).unwrap());
        assert!(matches!(
            svc.create_change_request(dangling),
            Err(CapaError::Relationship(RelationshipError::DanglingReference { .. }))
        ));
    }

    #[test]
    fn test_saved_filter_preferences() {
        let svc = service(TransitionPolicy::Strict);
        let user = RecordId::new(1).unwrap();
        assert_eq!(svc.saved_filters(user).unwrap(), None);

        let settings = FilterSettings {
            status: Some(CapaStatus::Closed),
            trigger_source: Some(TriggerSource::Deviation),
            ..Default::default()
        };
        svc.save_filter_preference(user, &settings).unwrap();
        let saved = svc.saved_filters(user).unwrap().unwrap();
        assert_eq!(saved["capa_status"], "CLOSED");
        assert_eq!(saved["capa_source"], "DEVIATIONS");

        let complaint = FilterSettings {
            trigger_source: Some(TriggerSource::MarketComplaint),
            ..Default::default()
        };
        assert!(matches!(
            svc.save_filter_preference(user, &complaint),
            Err(CapaError::Validation { .. })
        ));

        let mut bogus = FilterSettings::default();
        bogus.remember(&filters(&[("owner", "me")]));
        assert!(matches!(
            svc.save_filter_preference(user, &bogus),
            Err(CapaError::Query(QueryError::UnknownFilterField { .. }))
        ));
    }
}
