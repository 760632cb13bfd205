//! Shared helper functions for CLI commands

use chrono::NaiveDate;
use miette::{IntoDiagnostic, Result};
use tracing::debug;

use crate::cli::GlobalOpts;
use crate::core::config::Config;
use crate::core::error::CapaError;
use crate::core::identity::RecordId;
use crate::core::project::Project;
use crate::core::query::{QueryBuilder, SortKey};
use crate::core::service::{CapaService, PageRequest};
use crate::core::store::SqliteStore;
use crate::core::workflow::WorkflowEngine;

/// An opened project: its configuration and a service over its database
pub struct Session {
    pub project: Project,
    pub config: Config,
    pub service: CapaService<SqliteStore>,
}

impl Session {
    /// Discover the project from the current directory and open its store
    pub fn open(global: &GlobalOpts) -> Result<Self> {
        let project = Project::discover().map_err(|e| miette::miette!("{}", e))?;
        Self::open_project(project, global)
    }

    pub fn open_project(project: Project, global: &GlobalOpts) -> Result<Self> {
        let config = Config::load(Some(&project)).into_diagnostic()?;
        let policy = global.policy.unwrap_or_else(|| config.policy());
        let database = config.database_path(&project);

        debug!(database = %database.display(), %policy, "opening record store");
        let store = SqliteStore::open(&database).map_err(CapaError::from)?;

        let service = CapaService::new(
            store,
            WorkflowEngine::new(policy),
            QueryBuilder::new(config.max_page_size()),
        );
        Ok(Self {
            project,
            config,
            service,
        })
    }

    /// Page request with the configured default size when none is given
    pub fn page(&self, page: i64, page_size: Option<i64>, sort: SortKey) -> PageRequest {
        let size = page_size.unwrap_or_else(|| i64::from(self.config.default_page_size()));
        PageRequest::new(page, size).sorted_by(sort)
    }

    /// The explicit user, else the configured one
    pub fn user_id(&self, explicit: Option<RecordId>) -> Result<RecordId> {
        explicit.or(self.config.user_id()).ok_or_else(|| {
            miette::miette!(
                help = "pass --user, set user_id in .qtrack/config.yaml, or export QTRACK_USER",
                "no user configured for saved filters"
            )
        })
    }
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Parse a `key=value` filter argument
pub fn parse_filter_pair(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing filter key in '{}'", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Truncate a string to max_len characters, adding "..." if truncated
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Render an optional value, "-" when absent
pub fn or_dash<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
