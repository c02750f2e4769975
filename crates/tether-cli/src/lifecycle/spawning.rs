//! Server process spawning.
//!
//! The payload is this same binary re-executed with the hidden `serve`
//! subcommand. Leading configuration flags are forwarded verbatim so the
//! child resolves the same state directory and logging settings.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs::{File, OpenOptions};
use std::io;
use std::process::{Child, Command, Stdio};

use time::OffsetDateTime;
use tracing::debug;

use super::LIFECYCLE_TARGET;
use super::interrupt::InterruptFlag;
use super::launcher::{LaunchError, LaunchRequest, Launched, ProcessHandle, ServerLauncher};
use super::readiness::wait_for_ready;

/// Environment variable naming the binary used for the server child.
const SERVER_BIN_ENV: &str = "TETHER_SERVER_BIN";

/// Launcher spawning real child processes.
#[derive(Debug)]
pub(crate) struct SystemLauncher {
    binary: OsString,
    config_arguments: Vec<OsString>,
    interrupt: InterruptFlag,
}

impl SystemLauncher {
    pub(crate) fn new(
        binary_override: Option<&OsStr>,
        config_arguments: &[OsString],
        interrupt: InterruptFlag,
    ) -> Self {
        Self {
            binary: resolve_server_binary(binary_override),
            config_arguments: config_arguments.to_vec(),
            interrupt,
        }
    }

    fn command(&self, request: &LaunchRequest<'_>) -> Command {
        let mut command = Command::new(&self.binary);
        // argv[0] of the manager is not a flag.
        command.args(self.config_arguments.iter().skip(1));
        command
            .arg("serve")
            .arg("--engine")
            .arg(request.engine.to_string())
            .arg("--host")
            .arg(request.host)
            .arg("--port")
            .arg(request.port.to_string());
        command
    }

    fn spawn(&self, request: &LaunchRequest<'_>) -> Result<Child, LaunchError> {
        let mut command = self.command(request);
        if request.detached {
            let log = open_log(request)?;
            let log_err = log.try_clone().map_err(|source| LaunchError::LogSink {
                path: request.log_path.to_path_buf(),
                source,
            })?;
            command
                .stdin(Stdio::null())
                .stdout(Stdio::from(log))
                .stderr(Stdio::from(log_err));
            detach(&mut command);
        } else {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
        command.spawn().map_err(|source| LaunchError::Spawn {
            binary: self.binary.clone(),
            source,
        })
    }
}

impl ServerLauncher for SystemLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Launched, LaunchError> {
        let started_at = OffsetDateTime::now_utc();
        let mut child = self.spawn(request)?;
        debug!(
            target: LIFECYCLE_TARGET,
            pid = child.id(),
            engine = %request.engine,
            host = request.host,
            port = request.port,
            detached = request.detached,
            "server process spawned"
        );
        wait_for_ready(&mut child, request, &self.interrupt)?;
        let handle = if request.detached {
            ProcessHandle::Detached { pid: child.id() }
        } else {
            ProcessHandle::Attached(child)
        };
        Ok(Launched {
            handle,
            engine: request.engine,
            started_at,
        })
    }
}

fn resolve_server_binary(binary_override: Option<&OsStr>) -> OsString {
    binary_override
        .map(OsString::from)
        .or_else(|| env::var_os(SERVER_BIN_ENV))
        .or_else(|| env::current_exe().ok().map(OsString::from))
        .unwrap_or_else(|| OsString::from("tether"))
}

fn open_log(request: &LaunchRequest<'_>) -> Result<File, LaunchError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(request.log_path)
        .map_err(|source| LaunchError::LogSink {
            path: request.log_path.to_path_buf(),
            source,
        })
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: `new_session` only calls the async-signal-safe `setsid(2)`
    // between fork and exec.
    unsafe {
        command.pre_exec(new_session);
    }
}

#[cfg(unix)]
fn new_session() -> io::Result<()> {
    // SAFETY: `setsid` takes no arguments and only fails with EPERM when the
    // caller already leads a process group.
    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}
