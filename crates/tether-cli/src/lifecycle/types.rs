//! Lifecycle command types and output abstractions.
//!
//! Defines the payloads and IO wrappers shared across lifecycle commands so the
//! controller can remain agnostic of concrete writers.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Write;

use tether_config::{Config, DEFAULT_HOST, DEFAULT_PORT};

use super::LifecycleError;
use super::record::{Mode, ServerRecord};

/// Supported lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleCommand {
    Start,
    Stop,
    Status,
    Restart,
    CheckPort,
}

impl LifecycleCommand {
    /// Commands that may launch a server and therefore watch for Ctrl-C.
    pub(crate) const fn launches(self) -> bool {
        matches!(self, Self::Start | Self::Restart)
    }
}

/// Resolved options for `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StartOptions {
    pub host: String,
    pub port: u16,
    pub mode: Mode,
    pub force: bool,
    pub foreground: bool,
}

/// Options for `restart`; anything omitted is taken from the previous record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RestartOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub production: bool,
    pub force: bool,
}

impl RestartOptions {
    /// Fills gaps from the record of the instance that was just stopped.
    pub(crate) fn resolve(&self, previous: Option<&ServerRecord>) -> StartOptions {
        let host = self
            .host
            .clone()
            .or_else(|| previous.map(|record| record.host.clone()))
            .unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let port = self
            .port
            .or_else(|| previous.map(|record| record.port))
            .unwrap_or(DEFAULT_PORT);
        let mode = if self.production {
            Mode::Production
        } else {
            previous.map_or(Mode::Development, |record| record.mode)
        };
        StartOptions {
            host,
            port,
            mode,
            force: self.force,
            foreground: false,
        }
    }
}

/// Target of `check-port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PortQuery {
    pub host: String,
    pub port: u16,
}

/// Invocation payload forwarded from the CLI runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LifecycleInvocation {
    Start(StartOptions),
    Stop,
    Status,
    Restart(RestartOptions),
    CheckPort(PortQuery),
}

impl LifecycleInvocation {
    pub(crate) const fn command(&self) -> LifecycleCommand {
        match self {
            Self::Start(_) => LifecycleCommand::Start,
            Self::Stop => LifecycleCommand::Stop,
            Self::Status => LifecycleCommand::Status,
            Self::Restart(_) => LifecycleCommand::Restart,
            Self::CheckPort(_) => LifecycleCommand::CheckPort,
        }
    }
}

/// Shared configuration context available to lifecycle handlers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LifecycleContext<'a> {
    pub config: &'a Config,
    pub config_arguments: &'a [OsString],
    pub server_binary: Option<&'a OsStr>,
}

/// Output handle abstracting over stdout/stderr writers.
pub(crate) struct LifecycleOutput<W: Write, E: Write> {
    pub stdout: W,
    pub stderr: E,
}

impl<W: Write, E: Write> LifecycleOutput<W, E> {
    pub(crate) const fn new(stdout: W, stderr: E) -> Self {
        Self { stdout, stderr }
    }

    pub(crate) fn stdout_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        self.stdout.write_fmt(args).map_err(LifecycleError::Io)?;
        self.stdout.write_all(b"\n").map_err(LifecycleError::Io)?;
        self.stdout.flush().map_err(LifecycleError::Io)
    }

    pub(crate) fn stderr_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        self.stderr.write_fmt(args).map_err(LifecycleError::Io)?;
        self.stderr.write_all(b"\n").map_err(LifecycleError::Io)?;
        self.stderr.flush().map_err(LifecycleError::Io)
    }
}
