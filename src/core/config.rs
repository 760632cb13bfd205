//! Configuration management with layered hierarchy
//!
//! Sources, lowest precedence first: built-in defaults, the global user
//! config, the project's `.qtrack/config.yaml`, then `QTRACK_*` environment
//! variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::identity::RecordId;
use crate::core::project::Project;
use crate::core::workflow::TransitionPolicy;

pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// qtrack configuration
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file; relative paths resolve against the project root
    pub database: Option<PathBuf>,

    /// Lifecycle strictness for status changes
    pub transition_policy: Option<TransitionPolicy>,

    /// Largest page a listing may request
    pub max_page_size: Option<u32>,

    /// Page size when a listing does not name one
    pub default_page_size: Option<u32>,

    /// Owner of saved filter preferences
    pub user_id: Option<RecordId>,
}

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("invalid configuration in {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },
}

impl Config {
    /// Load configuration from all sources, merging in priority order
    pub fn load(project: Option<&Project>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global) = Self::read_file(&global_path)? {
                config.merge(global);
            }
        }

        if let Some(project) = project {
            if let Some(local) = Self::read_file(&project.config_path())? {
                config.merge(local);
            }
        }

        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Read one YAML layer; a missing file is not an error
    pub fn read_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let has_settings = contents.lines().any(|line| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        });
        if !has_settings {
            return Ok(Some(Config::default()));
        }
        serde_yml::from_str::<Config>(&contents)
            .map(Some)
            .map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Overlay `QTRACK_*` variables obtained through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup("QTRACK_DB") {
            self.database = Some(PathBuf::from(db));
        }
        if let Some(policy) = lookup("QTRACK_POLICY") {
            self.transition_policy = Some(policy.parse().map_err(|reason| ConfigError::Env {
                var: "QTRACK_POLICY",
                reason,
            })?);
        }
        if let Some(max) = lookup("QTRACK_MAX_PAGE_SIZE") {
            let max = max
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|m| *m > 0)
                .ok_or_else(|| ConfigError::Env {
                    var: "QTRACK_MAX_PAGE_SIZE",
                    reason: format!("'{}' is not a positive integer", max),
                })?;
            self.max_page_size = Some(max);
        }
        if let Some(user) = lookup("QTRACK_USER") {
            self.user_id = Some(user.parse().map_err(|e: crate::core::identity::IdParseError| {
                ConfigError::Env {
                    var: "QTRACK_USER",
                    reason: e.to_string(),
                }
            })?);
        }
        Ok(())
    }

    /// Get the path to the global config file
    fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "qtrack")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Merge another config into this one (other takes precedence)
    fn merge(&mut self, other: Config) {
        if other.database.is_some() {
            self.database = other.database;
        }
        if other.transition_policy.is_some() {
            self.transition_policy = other.transition_policy;
        }
        if other.max_page_size.is_some() {
            self.max_page_size = other.max_page_size;
        }
        if other.default_page_size.is_some() {
            self.default_page_size = other.default_page_size;
        }
        if other.user_id.is_some() {
            self.user_id = other.user_id;
        }
    }

    pub fn database_path(&self, project: &Project) -> PathBuf {
        match &self.database {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => project.root().join(path),
            None => project.default_database_path(),
        }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.transition_policy.unwrap_or_default()
    }

    pub fn max_page_size(&self) -> u32 {
        self.max_page_size
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_MAX_PAGE_SIZE)
    }

    /// Default page size, never above the maximum
    pub fn default_page_size(&self) -> u32 {
        self.default_page_size
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(self.max_page_size())
    }

    pub fn user_id(&self) -> Option<RecordId> {
        self.user_id
    }
}
