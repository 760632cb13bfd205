//! Project discovery and structure

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the per-project directory
pub const PROJECT_DIR: &str = ".qtrack";

/// Represents a qtrack project
#[derive(Debug)]
pub struct Project {
    /// Root directory of the project (parent of .qtrack/)
    root: PathBuf,
}

impl Project {
    /// Find project root by walking up from the current directory
    pub fn discover() -> Result<Self, ProjectError> {
        let current =
            std::env::current_dir().map_err(|e| ProjectError::IoError(e.to_string()))?;
        Self::discover_from(&current)
    }

    /// Find project root by walking up from the given directory
    pub fn discover_from(start: &Path) -> Result<Self, ProjectError> {
        let mut current = start
            .canonicalize()
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        loop {
            if current.join(PROJECT_DIR).is_dir() {
                return Ok(Self { root: current });
            }

            if !current.pop() {
                return Err(ProjectError::NotFound {
                    searched_from: start.to_path_buf(),
                });
            }
        }
    }

    /// Create `.qtrack/` with a default config at the given path
    pub fn init(path: &Path) -> Result<Self, ProjectError> {
        std::fs::create_dir_all(path).map_err(|e| ProjectError::IoError(e.to_string()))?;
        let root = path
            .canonicalize()
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        let project = Self { root };
        if project.qtrack_dir().exists() {
            return Err(ProjectError::AlreadyExists(project.root));
        }

        std::fs::create_dir_all(project.qtrack_dir())
            .map_err(|e| ProjectError::IoError(e.to_string()))?;
        std::fs::write(project.config_path(), Self::default_config())
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        Ok(project)
    }

    fn default_config() -> &'static str {
        r#"# qtrack project configuration

# Database file, relative to the project root
# database: .qtrack/qtrack.db

# Lifecycle enforcement: strict or permissive
# transition_policy: strict

# Listing page sizes
# max_page_size: 100
# default_page_size: 20

# Owner of saved filter preferences
# user_id: 1
"#
    }

    /// Get the project root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the .qtrack configuration directory
    pub fn qtrack_dir(&self) -> PathBuf {
        self.root.join(PROJECT_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.qtrack_dir().join("config.yaml")
    }

    pub fn default_database_path(&self) -> PathBuf {
        self.qtrack_dir().join("qtrack.db")
    }
}

/// Errors that can occur during project operations
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("not a qtrack project (searched from {searched_from:?}). Run 'qtrack init' to create one.")]
    NotFound { searched_from: PathBuf },

    #[error("qtrack project already exists at {0:?}")]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    IoError(String),
}
