//! Process liveness checks and termination.
//!
//! The controller only talks to [`ProcessProbe`]; the platform variant is
//! chosen at compile time through [`SystemProbe`].

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::port;

#[cfg(unix)]
mod posix;
#[cfg(not(unix))]
mod windows;

#[cfg(unix)]
pub(crate) use posix::PosixProbe as SystemProbe;
#[cfg(not(unix))]
pub(crate) use windows::WindowsProbe as SystemProbe;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait after the forced kill before giving up.
pub(super) const KILL_WAIT: Duration = Duration::from_secs(2);

/// Failures while stopping a process.
#[derive(Debug, Error)]
pub(crate) enum TerminationError {
    #[error("not permitted to signal pid {pid}")]
    PermissionDenied { pid: u32 },
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },
    #[error("pid {pid} was still running after {waited_ms} ms")]
    StillRunning { pid: u32, waited_ms: u64 },
    #[error("pid {pid} cannot be addressed on this platform")]
    InvalidPid { pid: u32 },
}

/// Platform view of processes.
pub(crate) trait ProcessProbe {
    /// PID-level existence check.
    fn pid_exists(&self, pid: u32) -> bool;

    /// The pid exists and the port it claims is answering.
    ///
    /// The port check guards against a recycled pid; it is best effort.
    fn is_alive(&self, pid: u32, host: &str, port: u16) -> bool {
        self.pid_exists(pid) && port::is_port_open(host, port)
    }

    /// Politely stops `pid`, escalating to a forced kill after `grace`.
    ///
    /// A process that is already gone counts as stopped.
    fn terminate(&self, pid: u32, grace: Duration) -> Result<(), TerminationError>;
}

/// Polls until `pid` disappears; returns whether it did within `timeout`.
pub(super) fn wait_for_exit<P: ProcessProbe + ?Sized>(
    probe: &P,
    pid: u32,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !probe.pid_exists(pid) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

pub(super) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
