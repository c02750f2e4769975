use std::io;

use thiserror::Error;

use crate::engine::{DISABLED_ENGINES_ENV, Engine};
use crate::{EXIT_ENGINE_UNAVAILABLE, EXIT_PORT_IN_USE};

/// Errors raised while running the HTTP payload.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The engine cannot run on this platform.
    #[error("engine '{engine}' is not supported on this platform")]
    EngineUnsupported { engine: Engine },
    /// The engine was disabled by the operator.
    #[error("engine '{engine}' is disabled via {DISABLED_ENGINES_ENV}")]
    EngineDisabled { engine: Engine },
    /// The bind address could not be resolved.
    #[error("failed to resolve bind address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// Another socket already owns the address.
    #[error("address {address} is already in use")]
    PortInUse {
        address: String,
        #[source]
        source: io::Error,
    },
    /// Binding failed for another reason.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    /// The async runtime could not be built.
    #[error("failed to build the {engine} runtime: {source}")]
    Runtime {
        engine: Engine,
        #[source]
        source: io::Error,
    },
    /// Installing signal handlers failed.
    #[error("failed to install shutdown signal handlers: {0}")]
    Signals(#[source] io::Error),
    /// The server loop stopped with an error.
    #[error("server loop failed: {0}")]
    Serve(#[source] io::Error),
}

impl ServeError {
    /// Process exit status that communicates this failure to the launcher.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::PortInUse { .. } => EXIT_PORT_IN_USE,
            Self::EngineUnsupported { .. } | Self::EngineDisabled { .. } => {
                EXIT_ENGINE_UNAVAILABLE
            }
            _ => 1,
        }
    }

    pub(crate) fn from_bind(address: String, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AddrInUse {
            Self::PortInUse { address, source }
        } else {
            Self::Bind { address, source }
        }
    }
}
