use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Host the server binds to when `--host` is omitted.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the server binds to when `--port` is omitted.
pub const DEFAULT_PORT: u16 = 8080;

/// State directory, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".tether";

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default readiness window in milliseconds.
pub const DEFAULT_READINESS_TIMEOUT_MS: u64 = 10_000;

/// Default termination grace period in milliseconds.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5_000;

/// Owned state directory used by serde defaults.
#[must_use]
pub fn default_state_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_STATE_DIR)
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

#[must_use]
pub const fn default_readiness_timeout_ms() -> u64 {
    DEFAULT_READINESS_TIMEOUT_MS
}

#[must_use]
pub const fn default_grace_period_ms() -> u64 {
    DEFAULT_GRACE_PERIOD_MS
}
