//! Windows process probe built on the process table and `taskkill`.

use std::process::{Command, Stdio};
use std::time::Duration;

use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use super::{KILL_WAIT, ProcessProbe, TerminationError, millis, wait_for_exit};
use crate::lifecycle::LIFECYCLE_TARGET;

/// Probe using `sysinfo` lookups and `taskkill`.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct WindowsProbe;

impl WindowsProbe {
    /// Runs `taskkill`; `Ok(false)` when it reports failure.
    fn taskkill(pid: u32, force: bool) -> Result<bool, TerminationError> {
        let mut command = Command::new("taskkill");
        if force {
            command.arg("/F");
        }
        command
            .arg("/PID")
            .arg(pid.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
            .status()
            .map(|status| status.success())
            .map_err(|source| TerminationError::Signal { pid, source })
    }
}

impl ProcessProbe for WindowsProbe {
    fn pid_exists(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        let sys_pid = SysPid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        system.process(sys_pid).is_some()
    }

    fn terminate(&self, pid: u32, grace: Duration) -> Result<(), TerminationError> {
        if pid == 0 {
            return Err(TerminationError::InvalidPid { pid });
        }
        if !self.pid_exists(pid) {
            return Ok(());
        }
        if Self::taskkill(pid, false)? {
            debug!(target: LIFECYCLE_TARGET, pid, grace_ms = millis(grace), "requested close");
            if wait_for_exit(self, pid, grace) {
                return Ok(());
            }
        }

        warn!(target: LIFECYCLE_TARGET, pid, "process did not close; forcing termination");
        Self::taskkill(pid, true)?;
        if wait_for_exit(self, pid, KILL_WAIT) {
            return Ok(());
        }
        Err(TerminationError::StillRunning {
            pid,
            waited_ms: millis(grace + KILL_WAIT),
        })
    }
}
