//! Filtered, paginated queries over stored records
//!
//! Filter keys are looked up in a per-record allow-list that maps each key to
//! a fixed column and comparison. Only those static column names ever reach
//! the SQL text; every caller-supplied value is bound as a parameter.
//!
//! Pagination is only stable under a total order, so the sort key is always
//! followed by `id ASC` as a tie-breaker.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use chrono::NaiveDate;
use thiserror::Error;

use crate::core::entity::{normalize_token, EntityKind};
use crate::core::identity::RecordId;
use crate::entities::capa::{CapaRecord, CapaSource, CapaStatus};
use crate::entities::change_request::{AreaAffected, ChangeRequest, ChangeRequestStatus};

/// Caller-supplied filters: allow-listed key → raw value
pub type Filters = BTreeMap<String, String>;

/// How a filter value compares against its column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    AtLeast,
    AtMost,
}

impl Comparison {
    fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::AtLeast => ">=",
            Comparison::AtMost => "<=",
        }
    }
}

/// Expected shape of a filter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Id,
    Date,
    /// One of the listed stored names
    Enum(&'static [&'static str]),
}

/// One entry of an allow-list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterField {
    pub key: &'static str,
    pub column: &'static str,
    pub comparison: Comparison,
    pub kind: ValueKind,
}

impl FilterField {
    pub const fn new(
        key: &'static str,
        column: &'static str,
        comparison: Comparison,
        kind: ValueKind,
    ) -> Self {
        Self {
            key,
            column,
            comparison,
            kind,
        }
    }
}

/// A record kind that can be listed through the query builder
pub trait Filterable {
    const ENTITY: EntityKind;

    /// Allowed filter keys
    const FILTERS: &'static [FilterField];

    /// Allowed sort fields; each is also its column name
    const SORTS: &'static [&'static str];
}

impl Filterable for CapaRecord {
    const ENTITY: EntityKind = EntityKind::Capa;

    const FILTERS: &'static [FilterField] = &[
        FilterField::new("id", "id", Comparison::Eq, ValueKind::Id),
        FilterField::new(
            "capa_source",
            "capa_source",
            Comparison::Eq,
            ValueKind::Enum(CapaSource::NAMES),
        ),
        FilterField::new(
            "capa_status",
            "capa_status",
            Comparison::Eq,
            ValueKind::Enum(CapaStatus::NAMES),
        ),
        FilterField::new(
            "assigned_personnel_id",
            "assigned_personnel_id",
            Comparison::Eq,
            ValueKind::Id,
        ),
        FilterField::new("due_date_from", "due_date", Comparison::AtLeast, ValueKind::Date),
        FilterField::new("due_date_to", "due_date", Comparison::AtMost, ValueKind::Date),
        FilterField::new(
            "completion_date_from",
            "completion_date",
            Comparison::AtLeast,
            ValueKind::Date,
        ),
        FilterField::new(
            "completion_date_to",
            "completion_date",
            Comparison::AtMost,
            ValueKind::Date,
        ),
    ];

    const SORTS: &'static [&'static str] = &[
        "id",
        "due_date",
        "completion_date",
        "opened_on",
        "capa_status",
        "capa_source",
    ];
}

impl Filterable for ChangeRequest {
    const ENTITY: EntityKind = EntityKind::ChangeRequest;

    const FILTERS: &'static [FilterField] = &[
        FilterField::new("id", "id", Comparison::Eq, ValueKind::Id),
        FilterField::new(
            "change_request_status",
            "change_request_status",
            Comparison::Eq,
            ValueKind::Enum(ChangeRequestStatus::NAMES),
        ),
        FilterField::new(
            "areas_affected",
            "areas_affected",
            Comparison::Eq,
            ValueKind::Enum(AreaAffected::NAMES),
        ),
        FilterField::new(
            "fk_capa_record_id",
            "fk_capa_record_id",
            Comparison::Eq,
            ValueKind::Id,
        ),
        FilterField::new(
            "fk_deviation_record_id",
            "fk_deviation_record_id",
            Comparison::Eq,
            ValueKind::Id,
        ),
        FilterField::new(
            "submission_date_from",
            "submission_date",
            Comparison::AtLeast,
            ValueKind::Date,
        ),
        FilterField::new(
            "submission_date_to",
            "submission_date",
            Comparison::AtMost,
            ValueKind::Date,
        ),
    ];

    const SORTS: &'static [&'static str] = &[
        "id",
        "change_request_number",
        "submission_date",
        "change_request_status",
    ];
}

/// Errors building a query
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unknown filter field '{field}' for {entity}")]
    UnknownFilterField { entity: EntityKind, field: String },

    #[error("Invalid value for filter '{field}': {reason}")]
    InvalidFilterValue { field: String, reason: String },

    #[error("Page size must be between 1 and {max} (got {size})")]
    InvalidPageSize { size: i64, max: u32 },

    #[error("Page numbers start at 1 (got {page})")]
    InvalidPage { page: i64 },

    #[error("Unknown sort field '{field}' for {entity}")]
    UnknownSortField { entity: EntityKind, field: String },
}

/// A value bound to a `?` placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParam {
    Integer(i64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Requested ordering: `field[:asc|:desc]`, default `id:asc`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

impl Default for SortKey {
    fn default() -> Self {
        Self::new("id", SortDirection::Asc)
    }
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.direction {
            SortDirection::Asc => write!(f, "{}:asc", self.field),
            SortDirection::Desc => write!(f, "{}:desc", self.field),
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, direction) = match s.trim().split_once(':') {
            Some((field, dir)) => {
                let direction = match dir.to_lowercase().as_str() {
                    "asc" => SortDirection::Asc,
                    "desc" => SortDirection::Desc,
                    _ => return Err(format!("Invalid sort direction: {}. Use asc or desc", dir)),
                };
                (field, direction)
            }
            None => (s.trim(), SortDirection::Asc),
        };
        if field.is_empty() {
            return Err("Sort field must not be empty".to_string());
        }
        Ok(SortKey::new(field.to_lowercase(), direction))
    }
}

/// A validated query over records of kind `R`: static SQL fragments plus
/// bound values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuery<R> {
    conditions: Vec<String>,
    order_by: String,
    params: Vec<QueryParam>,
    limit: i64,
    offset: i64,
    kind: PhantomData<fn() -> R>,
}

impl<R: Filterable> PreparedQuery<R> {
    pub fn table(&self) -> &'static str {
        R::ENTITY.table()
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Full statement selecting `columns`, ending in `LIMIT ? OFFSET ?`
    pub fn to_sql(&self, columns: &str) -> String {
        let mut sql = format!("SELECT {} FROM {}", columns, self.table());
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&self.order_by);
        sql.push_str(" LIMIT ? OFFSET ?");
        sql
    }

    /// Values for every placeholder of [`to_sql`](Self::to_sql), in order
    pub fn bind_values(&self) -> Vec<QueryParam> {
        let mut values = self.params.clone();
        values.push(QueryParam::Integer(self.limit));
        values.push(QueryParam::Integer(self.offset));
        values
    }
}

/// Builds [`PreparedQuery`] values within a configured page-size ceiling
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder {
    max_page_size: u32,
}

impl QueryBuilder {
    pub fn new(max_page_size: u32) -> Self {
        Self { max_page_size }
    }

    pub fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    /// Validate filters and paging for record kind `R`.
    ///
    /// Pages are 1-based; a page past the end simply yields no rows.
    pub fn build<R: Filterable>(
        &self,
        filters: &Filters,
        page: i64,
        page_size: i64,
        sort: &SortKey,
    ) -> Result<PreparedQuery<R>, QueryError> {
        if page_size <= 0 || page_size > i64::from(self.max_page_size) {
            return Err(QueryError::InvalidPageSize {
                size: page_size,
                max: self.max_page_size,
            });
        }
        if page < 1 {
            return Err(QueryError::InvalidPage { page });
        }
        let offset = (page - 1)
            .checked_mul(page_size)
            .ok_or(QueryError::InvalidPage { page })?;

        let mut conditions = Vec::with_capacity(filters.len());
        let mut params = Vec::with_capacity(filters.len());
        for (key, raw) in filters {
            let field = R::FILTERS
                .iter()
                .find(|f| f.key == key.as_str())
                .ok_or_else(|| QueryError::UnknownFilterField {
                    entity: R::ENTITY,
                    field: key.clone(),
                })?;
            params.push(parse_value(field, raw)?);
            conditions.push(format!("{} {} ?", field.column, field.comparison.operator()));
        }

        let sort_column = R::SORTS
            .iter()
            .copied()
            .find(|s| *s == sort.field.as_str())
            .ok_or_else(|| QueryError::UnknownSortField {
                entity: R::ENTITY,
                field: sort.field.clone(),
            })?;
        let order_by = if sort_column == "id" {
            format!("id {}", sort.direction.keyword())
        } else {
            format!("{} {}, id ASC", sort_column, sort.direction.keyword())
        };

        Ok(PreparedQuery {
            conditions,
            order_by,
            params,
            limit: page_size,
            offset,
            kind: PhantomData,
        })
    }
}

fn parse_value(field: &FilterField, raw: &str) -> Result<QueryParam, QueryError> {
    let invalid = |reason: String| QueryError::InvalidFilterValue {
        field: field.key.to_string(),
        reason,
    };

    match field.kind {
        ValueKind::Id => raw
            .parse::<RecordId>()
            .map(|id| QueryParam::Integer(id.get()))
            .map_err(|e| invalid(e.to_string())),
        ValueKind::Date => raw
            .trim()
            .parse::<NaiveDate>()
            .map(|d| QueryParam::Text(d.to_string()))
            .map_err(|_| invalid(format!("'{}' is not a YYYY-MM-DD date", raw))),
        ValueKind::Enum(names) => {
            let token = normalize_token(raw);
            if names.contains(&token.as_str()) {
                Ok(QueryParam::Text(token))
            } else {
                Err(invalid(format!("'{}' is not one of {}", raw, names.join(", "))))
            }
        }
    }
}
