//! Error types for the CLI runtime and their exit codes.

use std::process::ExitCode;
use std::sync::Arc;

use tether_server::ServeError;
use tether_server::telemetry::TelemetryError;
use thiserror::Error;

use crate::lifecycle::LifecycleError;

const EXIT_USAGE: u8 = 2;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("server failed: {0}")]
    Serve(#[from] ServeError),
}

impl AppError {
    /// Exit status reported for this failure.
    pub(crate) fn exit_code(&self) -> ExitCode {
        match self {
            Self::LoadConfiguration(_) | Self::CliUsage(_) | Self::Telemetry(_) => {
                ExitCode::from(EXIT_USAGE)
            }
            Self::Serve(error) => ExitCode::from(error.exit_code()),
            Self::Lifecycle(_) => ExitCode::FAILURE,
        }
    }
}
