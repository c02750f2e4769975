//! Error types for server lifecycle operations.

use std::fmt;
use std::io;
use std::path::PathBuf;

use tether_config::StatePathsError;
use tether_server::Engine;
use thiserror::Error;

use super::launcher::{EngineFailures, LaunchError};
use super::port::PortOwner;
use super::probe::TerminationError;
use super::record::{LockHolder, RecordError};

/// What is known about whoever holds a busy port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Occupant {
    /// The tracked server itself.
    Tracked { pid: u32 },
    /// Something tether does not manage, named when the socket table
    /// shows it.
    Unknown {
        owner: Option<PortOwner>,
        alternatives: Vec<u16>,
    },
}

impl fmt::Display for Occupant {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tracked { pid } => write!(
                formatter,
                " by the tracked server (pid {pid}); stop it or pass --force"
            ),
            Self::Unknown {
                owner,
                alternatives,
            } => {
                let who = owner
                    .as_ref()
                    .map_or_else(|| String::from("another process"), ToString::to_string);
                write!(formatter, " by {who}")?;
                if alternatives.is_empty() {
                    return Ok(());
                }
                formatter.write_str("; free ports nearby: ")?;
                let mut first = true;
                for port in alternatives {
                    if !first {
                        formatter.write_str(", ")?;
                    }
                    write!(formatter, "{port}")?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

/// Errors raised while executing lifecycle commands.
#[derive(Debug, Error)]
pub(crate) enum LifecycleError {
    #[error("failed to write lifecycle output: {0}")]
    Io(#[source] io::Error),
    #[error(transparent)]
    Paths(#[from] StatePathsError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("port {host}:{port} is already in use{occupant}")]
    PortInUse {
        host: String,
        port: u16,
        occupant: Occupant,
    },
    #[error(
        "server is already running (pid {pid}) at {host}:{port}; stop it first or pass --force"
    )]
    AlreadyRunning { pid: u32, host: String, port: u16 },
    #[error(
        "another tether command is running{holder} and holds {path:?}; wait for it to finish"
    )]
    StartInProgress { path: PathBuf, holder: LockHolder },
    #[error("engine {engine} is not available on this host")]
    EngineUnavailable { engine: Engine },
    #[error("no server engine could start: {failures}")]
    NoAvailableEngine { failures: EngineFailures },
    #[error("server (pid {pid}) did not answer on port {port} within {timeout_ms} ms; it was stopped")]
    LaunchTimeout { pid: u32, port: u16, timeout_ms: u64 },
    #[error("start interrupted; server (pid {pid}) was stopped")]
    Interrupted { pid: u32 },
    #[error(
        "failed to stop server (pid {pid}) on port {port}: {source}; the record was kept"
    )]
    TerminationFailed {
        pid: u32,
        port: u16,
        #[source]
        source: TerminationError,
    },
    #[error(transparent)]
    Launch(LaunchError),
    #[error("failed to install interrupt handlers: {0}")]
    Signals(#[source] io::Error),
    #[error("failed to wait for server (pid {pid}): {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl LifecycleError {
    /// Lifts record errors, giving lock contention its own variant.
    pub(crate) fn from_record(error: RecordError) -> Self {
        match error {
            RecordError::Locked { path, holder } => Self::StartInProgress { path, holder },
            other => Self::Record(other),
        }
    }
}

impl From<LaunchError> for LifecycleError {
    fn from(error: LaunchError) -> Self {
        match error {
            LaunchError::PortInUse { host, port } => Self::PortInUse {
                host,
                port,
                occupant: Occupant::Unknown {
                    owner: None,
                    alternatives: Vec::new(),
                },
            },
            LaunchError::EngineUnavailable { engine } => Self::EngineUnavailable { engine },
            LaunchError::Timeout {
                pid,
                port,
                timeout_ms,
            } => Self::LaunchTimeout {
                pid,
                port,
                timeout_ms,
            },
            LaunchError::Interrupted { pid } => Self::Interrupted { pid },
            other => Self::Launch(other),
        }
    }
}
