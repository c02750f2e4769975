//! Derives state artefact paths shared by the manager and the server.
//!
//! The state directory houses the pid record, the start lock, and the log
//! sink. Every command resolves the same layout from [`Config::state_dir`] so
//! separate invocations agree on where the tracked instance is described.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

const RECORD_FILE: &str = "server.pid";
const LOCK_FILE: &str = "server.lock";
const LOG_FILE: &str = "server.log";

/// Canonical paths for state artefacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    state_dir: PathBuf,
    record_path: PathBuf,
    lock_path: PathBuf,
    log_path: PathBuf,
}

impl StatePaths {
    /// Derives the paths from configuration, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns [`StatePathsError::StateDirectory`] when the directory cannot be
    /// created.
    pub fn from_config(config: &Config) -> Result<Self, StatePathsError> {
        let paths = Self::from_config_readonly(config);
        fs::create_dir_all(&paths.state_dir).map_err(|source| {
            StatePathsError::StateDirectory {
                path: paths.state_dir.clone(),
                source,
            }
        })?;
        Ok(paths)
    }

    /// Derives the paths without touching the filesystem.
    #[must_use]
    pub fn from_config_readonly(config: &Config) -> Self {
        Self::new(config.state_dir().as_std_path())
    }

    /// Lays out the artefacts under an explicit directory.
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            record_path: state_dir.join(RECORD_FILE),
            lock_path: state_dir.join(LOCK_FILE),
            log_path: state_dir.join(LOG_FILE),
            state_dir: state_dir.to_path_buf(),
        }
    }

    /// Directory holding state artefacts.
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        self.state_dir.as_path()
    }

    /// Path to the persisted server record.
    #[must_use]
    pub fn record_path(&self) -> &Path {
        self.record_path.as_path()
    }

    /// Path to the lock file serialising mutating commands.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }

    /// Path to the append-only log of the detached server.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        self.log_path.as_path()
    }
}

/// Errors raised while preparing the state directory.
#[derive(Debug, Error)]
pub enum StatePathsError {
    /// Creating the state directory failed.
    #[error("failed to prepare state directory '{path}': {source}")]
    StateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
