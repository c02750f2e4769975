//! Server lifecycle management.
//!
//! The controller derives the state of the tracked server from the persisted
//! record and a live process probe, then starts, stops, restarts, or reports
//! on it. The surrounding modules supply the pieces it orchestrates:
//!
//! - `record`: the persisted `ServerRecord` and the start lock.
//! - `port`: side-effect-free TCP port probing.
//! - `probe`: platform process liveness and termination.
//! - `launcher`: engine selection and the ordered fallback chain.
//! - `spawning`/`readiness`: the concrete child process and its `/health`
//!   poll.

mod controller;
mod error;
mod interrupt;
mod launcher;
mod port;
mod probe;
mod readiness;
mod record;
mod spawning;
mod types;

const LIFECYCLE_TARGET: &str = "tether::lifecycle";

pub(crate) use controller::SystemLifecycle;
pub(crate) use error::LifecycleError;
pub(crate) use record::Mode;
pub(crate) use types::{
    LifecycleContext, LifecycleInvocation, LifecycleOutput, PortQuery, RestartOptions,
    StartOptions,
};

#[cfg(test)]
pub(crate) use controller::LifecycleController;
#[cfg(test)]
pub(crate) use launcher::{
    LaunchError, LaunchRequest, Launched, Platform, ProcessHandle, ServerLauncher,
};
#[cfg(test)]
pub(crate) use probe::{ProcessProbe, TerminationError};
#[cfg(test)]
pub(crate) use record::{RecordStore, ServerRecord, StartLock};
