//! POSIX process probe built on `kill(2)`.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use sysinfo::{Pid as SysPid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};

use super::{KILL_WAIT, ProcessProbe, TerminationError, millis, wait_for_exit};
use crate::lifecycle::LIFECYCLE_TARGET;

/// Probe using signals and the process table.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PosixProbe;

impl PosixProbe {
    /// Only strictly positive pids address a single process; `0` and
    /// negative values would signal whole process groups.
    fn to_raw(pid: u32) -> Option<Pid> {
        i32::try_from(pid)
            .ok()
            .filter(|raw| *raw > 0)
            .map(Pid::from_raw)
    }

    fn is_zombie(pid: u32) -> bool {
        let sys_pid = SysPid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        system
            .process(sys_pid)
            .is_some_and(|process| matches!(process.status(), ProcessStatus::Zombie))
    }

    fn signal(pid: u32, raw: Pid, signal: Signal) -> Result<bool, TerminationError> {
        match kill(raw, signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(Errno::EPERM) => Err(TerminationError::PermissionDenied { pid }),
            Err(errno) => Err(TerminationError::Signal {
                pid,
                source: errno.into(),
            }),
        }
    }
}

impl ProcessProbe for PosixProbe {
    fn pid_exists(&self, pid: u32) -> bool {
        let Some(raw) = Self::to_raw(pid) else {
            return false;
        };
        match kill(raw, None) {
            Ok(()) => !Self::is_zombie(pid),
            Err(Errno::ESRCH) => false,
            Err(errno) => {
                debug!(target: LIFECYCLE_TARGET, pid, %errno, "treating unprobeable pid as alive");
                true
            }
        }
    }

    fn terminate(&self, pid: u32, grace: Duration) -> Result<(), TerminationError> {
        let raw = Self::to_raw(pid).ok_or(TerminationError::InvalidPid { pid })?;
        if !Self::signal(pid, raw, Signal::SIGTERM)? {
            return Ok(());
        }
        debug!(target: LIFECYCLE_TARGET, pid, grace_ms = millis(grace), "sent SIGTERM");
        if wait_for_exit(self, pid, grace) {
            return Ok(());
        }

        warn!(target: LIFECYCLE_TARGET, pid, "grace period elapsed; sending SIGKILL");
        if !Self::signal(pid, raw, Signal::SIGKILL)? {
            return Ok(());
        }
        if wait_for_exit(self, pid, KILL_WAIT) {
            return Ok(());
        }
        Err(TerminationError::StillRunning {
            pid,
            waited_ms: millis(grace + KILL_WAIT),
        })
    }
}
