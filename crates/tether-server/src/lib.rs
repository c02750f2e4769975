//! HTTP payload launched by the tether manager.
//!
//! The manager re-executes its own binary with the hidden `serve` subcommand,
//! which lands in [`run`]. The payload binds the requested address with the
//! selected [`Engine`], answers `/`, `/health`, and `/api/info`, and exits
//! cleanly on SIGTERM or Ctrl-C. Startup failures leave the process with one
//! of the exit codes below so the launcher can tell a busy port apart from an
//! engine that cannot run.

mod engine;
mod errors;
mod routes;
mod serve;
mod shutdown;
pub mod telemetry;

pub use engine::{DISABLED_ENGINES_ENV, Engine, disabled_in};
pub use errors::ServeError;
pub use routes::{AppState, HealthResponse, InfoResponse, router};
pub use serve::{ServeOptions, run};

/// Exit status reported when the listening socket could not be bound.
pub const EXIT_PORT_IN_USE: u8 = 3;

/// Exit status reported when the requested engine cannot run.
pub const EXIT_ENGINE_UNAVAILABLE: u8 = 4;

/// Name reported by `/api/info`.
pub const SERVER_NAME: &str = "tether";

pub(crate) const SERVER_TARGET: &str = "tether::server";
