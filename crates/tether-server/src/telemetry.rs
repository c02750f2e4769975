//! Structured telemetry for the two processes `tether` runs as.
//!
//! The manager is a short-lived command whose diagnostics land on the
//! operator's terminal, so its events stay terse. The server usually runs
//! detached with stderr redirected to `server.log`; its events carry
//! timestamps, targets, and worker thread names so the log can be read after
//! the fact.

use std::fmt as std_fmt;
use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::UtcTime;

use tether_config::{Config, LogFormat};

use crate::SERVER_TARGET;

static INSTALLED_ROLE: OnceCell<Role> = OnceCell::new();

/// Which side of the process split is emitting events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The `start`/`stop`/`status` command talking to an operator.
    Manager,
    /// The long-running HTTP server writing to its log file.
    Server,
}

impl std_fmt::Display for Role {
    fn fmt(&self, formatter: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        match self {
            Self::Manager => formatter.write_str("manager"),
            Self::Server => formatter.write_str("server"),
        }
    }
}

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryHandle {
    role: Role,
}

impl TelemetryHandle {
    /// Role whose subscriber is installed for this process.
    #[must_use]
    pub const fn role(self) -> Role {
        self.role
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber for `role` on the first call.
///
/// Later calls keep whichever role was installed first and report it through
/// the returned handle.
///
/// # Errors
///
/// Fails when the filter expression is invalid or another subscriber was
/// installed outside this module.
pub fn initialise(config: &Config, role: Role) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED_ROLE
        .get_or_try_init(|| install_subscriber(config, role).map(|()| role))
        .map(|installed| TelemetryHandle { role: *installed })
}

fn install_subscriber(config: &Config, role: Role) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let subscriber = match role {
        Role::Manager => manager_subscriber(filter, config.log_format()),
        Role::Server => server_subscriber(filter, config.log_format()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    tracing::debug!(target: SERVER_TARGET, %role, "telemetry installed");
    Ok(())
}

fn manager_subscriber(filter: EnvFilter, format: LogFormat) -> Box<dyn Subscriber + Send + Sync> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .without_time();
    match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    }
}

fn server_subscriber(filter: EnvFilter, format: LogFormat) -> Box<dyn Subscriber + Send + Sync> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());
    match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    }
}
