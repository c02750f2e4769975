//! Shared configuration for the tether CLI and the server it manages.
//!
//! Both the manager commands and the hidden `serve` entrypoint load the same
//! [`Config`] so a child process launched with forwarded flags observes the
//! same state directory and logging settings as its parent.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;
mod paths;

pub use defaults::{
    DEFAULT_GRACE_PERIOD_MS, DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_PORT,
    DEFAULT_READINESS_TIMEOUT_MS, DEFAULT_STATE_DIR, default_grace_period_ms,
    default_log_filter_string, default_log_format, default_readiness_timeout_ms,
    default_state_dir,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use paths::{StatePaths, StatePathsError};

/// Layered configuration: defaults, config file, `TETHER_*` environment
/// variables and CLI flags, in increasing order of precedence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TETHER")]
pub struct Config {
    /// Directory holding the pid record, start lock, and server log.
    #[serde(default = "default_state_dir")]
    pub state_dir: Utf8PathBuf,
    /// `tracing` filter expression.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format for structured logs.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// How long `start` waits for `/health` to answer.
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    /// Grace period between a polite termination request and a forced kill.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl Config {
    /// Directory holding runtime state.
    #[must_use]
    pub fn state_dir(&self) -> &Utf8Path {
        self.state_dir.as_path()
    }

    /// Configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Readiness window for newly launched servers.
    #[must_use]
    pub const fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    /// Grace period granted before a forced kill.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_documented_values() {
        let config = Config::default();
        assert_eq!(config.state_dir(), Utf8Path::new(DEFAULT_STATE_DIR));
        assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.readiness_timeout(), Duration::from_secs(10));
        assert_eq!(config.grace_period(), Duration::from_secs(5));
    }
}
