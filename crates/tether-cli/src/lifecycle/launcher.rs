//! Engine selection and the ordered fallback chain.
//!
//! A launch either yields a ready server or a [`LaunchError`] that says
//! whether the next engine is worth trying. Only engine-level failures move
//! the chain along; a busy port or a timeout would fail the same way with
//! any engine.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::Duration;

use tether_server::Engine;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

use super::LIFECYCLE_TARGET;
use super::error::LifecycleError;
use super::record::Mode;

/// Platform family, which decides the production engine order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub(crate) const fn current() -> Self {
        if cfg!(unix) { Self::Posix } else { Self::Windows }
    }
}

/// Engines to try, in order, for a mode on a platform.
pub(crate) fn candidates(mode: Mode, platform: Platform) -> Vec<Engine> {
    match (mode, platform) {
        (Mode::Development, _) => vec![Engine::Development],
        (Mode::Production, Platform::Windows) => vec![Engine::Threaded],
        (Mode::Production, Platform::Posix) => vec![Engine::ReusePort, Engine::Threaded],
    }
}

/// Everything a launcher needs to start one engine.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LaunchRequest<'a> {
    pub host: &'a str,
    pub port: u16,
    pub engine: Engine,
    pub detached: bool,
    pub log_path: &'a Path,
    pub readiness_timeout: Duration,
}

impl LaunchRequest<'_> {
    pub(crate) fn timeout_ms(&self) -> u64 {
        u64::try_from(self.readiness_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Ownership of the launched process.
#[derive(Debug)]
pub(crate) enum ProcessHandle {
    /// Foreground child still owned by this process.
    Attached(Child),
    /// Background server owned by the OS.
    Detached { pid: u32 },
}

impl ProcessHandle {
    pub(crate) fn pid(&self) -> u32 {
        match self {
            Self::Attached(child) => child.id(),
            Self::Detached { pid } => *pid,
        }
    }
}

/// A server that answered its readiness probe.
#[derive(Debug)]
pub(crate) struct Launched {
    pub handle: ProcessHandle,
    pub engine: Engine,
    pub started_at: OffsetDateTime,
}

/// Failures of a single launch attempt.
#[derive(Debug, Error)]
pub(crate) enum LaunchError {
    #[error("failed to spawn server binary {binary:?}: {source}")]
    Spawn {
        binary: OsString,
        #[source]
        source: io::Error,
    },
    #[error("failed to open server log {path:?}: {source}")]
    LogSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("port {host}:{port} is already in use")]
    PortInUse { host: String, port: u16 },
    #[error("engine {engine} is unavailable")]
    EngineUnavailable { engine: Engine },
    #[error("engine {engine} exited before it was ready (status: {status:?})")]
    ExitedEarly { engine: Engine, status: Option<i32> },
    #[error("server (pid {pid}) was not ready on port {port} within {timeout_ms} ms")]
    Timeout { pid: u32, port: u16, timeout_ms: u64 },
    #[error("launch of pid {pid} was interrupted")]
    Interrupted { pid: u32 },
    #[error("failed to monitor server launch: {source}")]
    Monitor {
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// Whether another engine might succeed where this one failed.
    pub(crate) const fn allows_fallback(&self) -> bool {
        matches!(self, Self::EngineUnavailable { .. } | Self::ExitedEarly { .. })
    }
}

/// One engine that could not serve, and why.
#[derive(Debug)]
pub(crate) struct EngineFailure {
    pub engine: Engine,
    pub error: LaunchError,
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.engine, self.error)
    }
}

/// Failures collected across a whole chain.
#[derive(Debug, Default)]
pub(crate) struct EngineFailures(pub Vec<EngineFailure>);

impl fmt::Display for EngineFailures {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                formatter.write_str("; ")?;
            }
            write!(formatter, "{failure}")?;
        }
        Ok(())
    }
}

/// Starts a server process and waits until it is ready.
pub(crate) trait ServerLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Launched, LaunchError>;
}

/// Tries `engines` in order, returning the first ready server together with
/// the failures of the engines tried before it.
pub(crate) fn launch_with_fallback<L: ServerLauncher + ?Sized>(
    launcher: &L,
    request: &LaunchRequest<'_>,
    engines: &[Engine],
) -> Result<(Launched, Vec<EngineFailure>), LifecycleError> {
    let mut failures = Vec::new();
    for engine in engines {
        let attempt = LaunchRequest {
            engine: *engine,
            ..*request
        };
        match launcher.launch(&attempt) {
            Ok(launched) => return Ok((launched, failures)),
            Err(error) if error.allows_fallback() => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    engine = %engine,
                    error = %error,
                    "engine failed; trying the next candidate"
                );
                failures.push(EngineFailure {
                    engine: *engine,
                    error,
                });
            }
            Err(error) => return Err(LifecycleError::from(error)),
        }
    }

    if engines.len() == 1
        && let Some(failure) = failures.pop()
    {
        return Err(LifecycleError::from(failure.error));
    }
    Err(LifecycleError::NoAvailableEngine {
        failures: EngineFailures(failures),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    #[derive(Clone, Copy)]
    enum Outcome {
        Ready(u32),
        Unavailable,
        Exits,
        PortBusy,
    }

    struct ScriptedLauncher {
        outcomes: HashMap<Engine, Outcome>,
        attempts: RefCell<Vec<Engine>>,
    }

    impl ScriptedLauncher {
        fn new(outcomes: &[(Engine, Outcome)]) -> Self {
            Self {
                outcomes: outcomes.iter().copied().collect(),
                attempts: RefCell::new(Vec::new()),
            }
        }
    }

    impl ServerLauncher for ScriptedLauncher {
        fn launch(&self, request: &LaunchRequest<'_>) -> Result<Launched, LaunchError> {
            self.attempts.borrow_mut().push(request.engine);
            match self.outcomes.get(&request.engine).copied() {
                Some(Outcome::Ready(pid)) => Ok(Launched {
                    handle: ProcessHandle::Detached { pid },
                    engine: request.engine,
                    started_at: OffsetDateTime::UNIX_EPOCH,
                }),
                Some(Outcome::Exits) => Err(LaunchError::ExitedEarly {
                    engine: request.engine,
                    status: Some(1),
                }),
                Some(Outcome::PortBusy) => Err(LaunchError::PortInUse {
                    host: request.host.to_owned(),
                    port: request.port,
                }),
                Some(Outcome::Unavailable) | None => Err(LaunchError::EngineUnavailable {
                    engine: request.engine,
                }),
            }
        }
    }

    fn request(log_path: &Path) -> LaunchRequest<'_> {
        LaunchRequest {
            host: "127.0.0.1",
            port: 8080,
            engine: Engine::Development,
            detached: true,
            log_path,
            readiness_timeout: Duration::from_secs(1),
        }
    }

    #[rstest]
    #[case::development_posix(Mode::Development, Platform::Posix, vec![Engine::Development])]
    #[case::development_windows(Mode::Development, Platform::Windows, vec![Engine::Development])]
    #[case::production_posix(
        Mode::Production,
        Platform::Posix,
        vec![Engine::ReusePort, Engine::Threaded]
    )]
    #[case::production_windows(Mode::Production, Platform::Windows, vec![Engine::Threaded])]
    fn candidate_order(#[case] mode: Mode, #[case] platform: Platform, #[case] expected: Vec<Engine>) {
        assert_eq!(candidates(mode, platform), expected);
    }

    #[test]
    fn falls_back_to_the_next_engine() {
        let launcher = ScriptedLauncher::new(&[
            (Engine::ReusePort, Outcome::Unavailable),
            (Engine::Threaded, Outcome::Ready(7)),
        ]);
        let log = PathBuf::from("server.log");
        let (launched, failures) = launch_with_fallback(
            &launcher,
            &request(&log),
            &[Engine::ReusePort, Engine::Threaded],
        )
        .expect("fallback succeeds");
        assert_eq!(launched.engine, Engine::Threaded);
        assert_eq!(launched.handle.pid(), 7);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].engine, Engine::ReusePort);
    }

    #[test]
    fn exhausted_chain_lists_every_failure() {
        let launcher = ScriptedLauncher::new(&[
            (Engine::ReusePort, Outcome::Unavailable),
            (Engine::Threaded, Outcome::Exits),
        ]);
        let log = PathBuf::from("server.log");
        let error = launch_with_fallback(
            &launcher,
            &request(&log),
            &[Engine::ReusePort, Engine::Threaded],
        )
        .expect_err("no engine");
        let LifecycleError::NoAvailableEngine { failures } = error else {
            panic!("expected NoAvailableEngine, got {error:?}");
        };
        assert_eq!(failures.0.len(), 2);
        let message = failures.to_string();
        assert!(message.contains("reuse_port: engine reuse_port is unavailable"));
        assert!(message.contains("; threaded: engine threaded exited"));
    }

    #[test]
    fn busy_port_stops_the_chain() {
        let launcher = ScriptedLauncher::new(&[
            (Engine::ReusePort, Outcome::PortBusy),
            (Engine::Threaded, Outcome::Ready(7)),
        ]);
        let log = PathBuf::from("server.log");
        let error = launch_with_fallback(
            &launcher,
            &request(&log),
            &[Engine::ReusePort, Engine::Threaded],
        )
        .expect_err("port busy");
        assert!(matches!(error, LifecycleError::PortInUse { port: 8080, .. }));
        assert_eq!(*launcher.attempts.borrow(), vec![Engine::ReusePort]);
    }

    #[test]
    fn single_candidate_surfaces_its_own_error() {
        let launcher = ScriptedLauncher::new(&[(Engine::Development, Outcome::Unavailable)]);
        let log = PathBuf::from("server.log");
        let error = launch_with_fallback(&launcher, &request(&log), &[Engine::Development])
            .expect_err("unavailable");
        assert!(matches!(
            error,
            LifecycleError::EngineUnavailable {
                engine: Engine::Development
            }
        ));
    }
}
