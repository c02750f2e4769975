//! High-level orchestration for server lifecycle commands.
//!
//! The controller never trusts the record on its own: every command derives a
//! [`ServerState`] from the record plus a live probe, and only commands that
//! hold the start lock mutate the record.

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use tether_config::{Config, StatePaths};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::LIFECYCLE_TARGET;
use super::error::{LifecycleError, Occupant};
use super::interrupt::InterruptFlag;
use super::launcher::{
    EngineFailures, LaunchRequest, Launched, Platform, ProcessHandle, ServerLauncher, candidates,
    launch_with_fallback,
};
use super::port::{http_base, is_port_open, port_owner, suggest_alternatives};
use super::probe::{ProcessProbe, SystemProbe};
use super::readiness::fetch_info;
use super::record::{RecordError, RecordStore, ServerRecord};
use super::spawning::SystemLauncher;
use super::types::{
    LifecycleContext, LifecycleInvocation, LifecycleOutput, PortQuery, RestartOptions,
    StartOptions,
};

const ALTERNATIVE_LIMIT: usize = 3;

/// Production lifecycle entrypoint wiring the platform probe and launcher.
#[derive(Debug, Default)]
pub(crate) struct SystemLifecycle;

impl SystemLifecycle {
    pub(crate) fn handle<W: Write, E: Write>(
        &mut self,
        invocation: LifecycleInvocation,
        context: LifecycleContext<'_>,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let interrupt = if invocation.command().launches() {
            InterruptFlag::install().map_err(LifecycleError::Signals)?
        } else {
            InterruptFlag::default()
        };
        let launcher =
            SystemLauncher::new(context.server_binary, context.config_arguments, interrupt);
        LifecycleController::new(SystemProbe::default(), launcher, Platform::current()).handle(
            invocation,
            context.config,
            output,
        )
    }
}

/// Derived view of the tracked server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ServerState {
    NotRunning,
    Running(ServerRecord),
    Stale(ServerRecord),
}

/// Lifecycle state machine over an injectable probe and launcher.
#[derive(Debug)]
pub(crate) struct LifecycleController<P, L> {
    probe: P,
    launcher: L,
    platform: Platform,
}

impl<P: ProcessProbe, L: ServerLauncher> LifecycleController<P, L> {
    pub(crate) const fn new(probe: P, launcher: L, platform: Platform) -> Self {
        Self {
            probe,
            launcher,
            platform,
        }
    }

    pub(crate) fn handle<W: Write, E: Write>(
        &self,
        invocation: LifecycleInvocation,
        config: &Config,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        match invocation {
            LifecycleInvocation::Start(options) => self.start(&options, config, output),
            LifecycleInvocation::Stop => self.stop(config, output),
            LifecycleInvocation::Status => self.status(config, output),
            LifecycleInvocation::Restart(options) => self.restart(&options, config, output),
            LifecycleInvocation::CheckPort(query) => self.check_port(&query, config, output),
        }
    }

    fn start<W: Write, E: Write>(
        &self,
        options: &StartOptions,
        config: &Config,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let store = RecordStore::new(StatePaths::from_config(config)?);
        let lock = store.lock().map_err(LifecycleError::from_record)?;
        let (launched, record) = self.start_locked(&store, options, config, output)?;
        drop(lock);
        self.finish_start(&store, launched, &record, output)
    }

    fn stop<W: Write, E: Write>(
        &self,
        config: &Config,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let paths = StatePaths::from_config_readonly(config);
        if !paths.state_dir().exists() {
            output.stdout_line(format_args!("server is not running"))?;
            return Ok(ExitCode::SUCCESS);
        }
        let store = RecordStore::new(paths);
        let _lock = store.lock().map_err(LifecycleError::from_record)?;
        self.stop_locked(&store, config, output)?;
        Ok(ExitCode::SUCCESS)
    }

    fn restart<W: Write, E: Write>(
        &self,
        options: &RestartOptions,
        config: &Config,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let store = RecordStore::new(StatePaths::from_config(config)?);
        let lock = store.lock().map_err(LifecycleError::from_record)?;
        let previous = self.stop_locked(&store, config, output)?;
        let resolved = options.resolve(previous.as_ref());
        let (launched, record) = match self.start_locked(&store, &resolved, config, output) {
            Ok(started) => started,
            Err(error) => {
                if previous.is_some() {
                    output.stderr_line(format_args!(
                        "server was stopped but did not start again"
                    ))?;
                }
                return Err(error);
            }
        };
        drop(lock);
        self.finish_start(&store, launched, &record, output)
    }

    fn status<W: Write, E: Write>(
        &self,
        config: &Config,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let paths = StatePaths::from_config_readonly(config);
        if !paths.state_dir().exists() {
            output.stdout_line(format_args!("server is not running"))?;
            return Ok(ExitCode::SUCCESS);
        }
        let store = RecordStore::new(paths);
        match self.inspect(&store, output, false)? {
            ServerState::NotRunning => output.stdout_line(format_args!("server is not running"))?,
            ServerState::Running(record) => self.report_running(&store, &record, output)?,
            ServerState::Stale(record) => self.heal_stale(&store, &record, output)?,
        }
        Ok(ExitCode::SUCCESS)
    }

    fn check_port<W: Write, E: Write>(
        &self,
        query: &PortQuery,
        config: &Config,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        if !is_port_open(&query.host, query.port) {
            output.stdout_line(format_args!("port {}:{} is free", query.host, query.port))?;
            return Ok(ExitCode::SUCCESS);
        }

        let store = RecordStore::new(StatePaths::from_config_readonly(config));
        let owner = match store.load() {
            Ok(Some(record)) if record.port == query.port && self.probe.pid_exists(record.pid) => {
                format!(" by the tracked server (pid {})", record.pid)
            }
            _ => port_owner(query.port)
                .map(|owner| format!(" by {owner}"))
                .unwrap_or_default(),
        };
        output.stdout_line(format_args!(
            "port {}:{} is in use{owner}",
            query.host, query.port
        ))?;
        let alternatives = suggest_alternatives(&query.host, query.port, ALTERNATIVE_LIMIT);
        if !alternatives.is_empty() {
            output.stdout_line(format_args!(
                "free ports nearby: {}",
                join_ports(&alternatives)
            ))?;
        }
        Ok(ExitCode::FAILURE)
    }

    /// Derives the server state, warning about and optionally removing a
    /// corrupt record.
    fn inspect<W: Write, E: Write>(
        &self,
        store: &RecordStore,
        output: &mut LifecycleOutput<W, E>,
        discard_corrupt: bool,
    ) -> Result<ServerState, LifecycleError> {
        let record = match store.load() {
            Ok(record) => record,
            Err(RecordError::Corrupt { path, source }) => {
                output.stderr_line(format_args!(
                    "warning: ignoring corrupt server record {}: {source}",
                    path.display()
                ))?;
                if discard_corrupt {
                    store.delete()?;
                }
                None
            }
            Err(error) => return Err(error.into()),
        };
        Ok(match record {
            None => ServerState::NotRunning,
            Some(record) if self.probe.is_alive(record.pid, &record.host, record.port) => {
                ServerState::Running(record)
            }
            Some(record) => ServerState::Stale(record),
        })
    }

    fn start_locked<W: Write, E: Write>(
        &self,
        store: &RecordStore,
        options: &StartOptions,
        config: &Config,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<(Launched, ServerRecord), LifecycleError> {
        match self.inspect(store, output, true)? {
            ServerState::NotRunning => {}
            ServerState::Running(record) if options.force => {
                self.terminate(store, &record, config.grace_period())?;
                output.stdout_line(format_args!(
                    "stopped tracked server (pid {}) before starting a new one",
                    record.pid
                ))?;
            }
            ServerState::Running(record) if record.port == options.port => {
                return Err(LifecycleError::PortInUse {
                    host: options.host.clone(),
                    port: options.port,
                    occupant: Occupant::Tracked { pid: record.pid },
                });
            }
            ServerState::Running(record) => {
                return Err(LifecycleError::AlreadyRunning {
                    pid: record.pid,
                    host: record.host,
                    port: record.port,
                });
            }
            ServerState::Stale(record) => {
                output.stderr_line(format_args!(
                    "warning: discarding stale record for pid {}",
                    record.pid
                ))?;
                store.delete()?;
            }
        }

        if is_port_open(&options.host, options.port) {
            if !options.force {
                return Err(busy_port(&options.host, options.port));
            }
            output.stderr_line(format_args!(
                "warning: port {}:{} is held by a process tether does not manage; launching anyway",
                options.host, options.port
            ))?;
        }

        let engines = candidates(options.mode, self.platform);
        let Some(first) = engines.first().copied() else {
            return Err(LifecycleError::NoAvailableEngine {
                failures: EngineFailures::default(),
            });
        };
        let request = LaunchRequest {
            host: &options.host,
            port: options.port,
            engine: first,
            detached: !options.foreground,
            log_path: store.paths().log_path(),
            readiness_timeout: config.readiness_timeout(),
        };
        let (launched, failures) = launch_with_fallback(&self.launcher, &request, &engines)
            .map_err(|error| match error {
                LifecycleError::PortInUse { host, port, .. } => busy_port(&host, port),
                other => other,
            })?;
        for failure in &failures {
            output.stderr_line(format_args!(
                "warning: engine {} failed ({}); fell back to {}",
                failure.engine, failure.error, launched.engine
            ))?;
        }

        let record = ServerRecord {
            pid: launched.handle.pid(),
            host: options.host.clone(),
            port: options.port,
            started_at: launched.started_at,
            mode: options.mode,
            engine: launched.engine,
        };
        if let Err(error) = store.save(&record) {
            self.discard(launched, config.grace_period());
            return Err(error.into());
        }
        debug!(
            target: LIFECYCLE_TARGET,
            pid = record.pid,
            engine = %record.engine,
            port = record.port,
            "server started"
        );
        Ok((launched, record))
    }

    /// Stops the tracked server; returns the last known record, if any.
    fn stop_locked<W: Write, E: Write>(
        &self,
        store: &RecordStore,
        config: &Config,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<Option<ServerRecord>, LifecycleError> {
        match self.inspect(store, output, true)? {
            ServerState::NotRunning => {
                output.stdout_line(format_args!("server is not running"))?;
                Ok(None)
            }
            ServerState::Stale(record) => {
                store.delete()?;
                output.stdout_line(format_args!(
                    "server is not running (removed stale record for pid {})",
                    record.pid
                ))?;
                Ok(Some(record))
            }
            ServerState::Running(record) => {
                self.terminate(store, &record, config.grace_period())?;
                output.stdout_line(format_args!("server stopped (pid {})", record.pid))?;
                Ok(Some(record))
            }
        }
    }

    fn terminate(
        &self,
        store: &RecordStore,
        record: &ServerRecord,
        grace: Duration,
    ) -> Result<(), LifecycleError> {
        self.probe
            .terminate(record.pid, grace)
            .map_err(|source| LifecycleError::TerminationFailed {
                pid: record.pid,
                port: record.port,
                source,
            })?;
        store.delete()?;
        debug!(target: LIFECYCLE_TARGET, pid = record.pid, "server stopped");
        Ok(())
    }

    fn finish_start<W: Write, E: Write>(
        &self,
        store: &RecordStore,
        launched: Launched,
        record: &ServerRecord,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        output.stdout_line(format_args!(
            "server started (pid {}) at {} [mode {}, engine {}]",
            record.pid,
            http_base(&record.host, record.port),
            record.mode,
            record.engine
        ))?;
        let ProcessHandle::Attached(mut child) = launched.handle else {
            output.stdout_line(format_args!(
                "logs: {}",
                store.paths().log_path().display()
            ))?;
            return Ok(ExitCode::SUCCESS);
        };

        output.stdout_line(format_args!("running in the foreground; press Ctrl-C to stop"))?;
        let status = child.wait().map_err(|source| LifecycleError::Wait {
            pid: record.pid,
            source,
        })?;
        if let Ok(Some(current)) = store.load()
            && current.pid == record.pid
        {
            store.delete()?;
        }
        output.stdout_line(format_args!(
            "server (pid {}) exited with {status}",
            record.pid
        ))?;
        Ok(if status.success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }

    fn discard(&self, launched: Launched, grace: Duration) {
        match launched.handle {
            ProcessHandle::Attached(mut child) => {
                if let Err(error) = child.kill().and_then(|()| child.wait().map(drop)) {
                    warn!(target: LIFECYCLE_TARGET, error = %error, "failed to stop unrecorded server");
                }
            }
            ProcessHandle::Detached { pid } => {
                if let Err(error) = self.probe.terminate(pid, grace) {
                    warn!(target: LIFECYCLE_TARGET, pid, error = %error, "failed to stop unrecorded server");
                }
            }
        }
    }

    fn report_running<W: Write, E: Write>(
        &self,
        store: &RecordStore,
        record: &ServerRecord,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<(), LifecycleError> {
        let uptime = record.uptime(OffsetDateTime::now_utc());
        output.stdout_line(format_args!("server is running"))?;
        output.stdout_line(format_args!("  pid: {}", record.pid))?;
        output.stdout_line(format_args!("  host: {}", record.host))?;
        output.stdout_line(format_args!("  port: {}", record.port))?;
        output.stdout_line(format_args!("  mode: {}", record.mode))?;
        output.stdout_line(format_args!("  engine: {}", record.engine))?;
        output.stdout_line(format_args!("  uptime: {}s", uptime.as_secs()))?;
        output.stdout_line(format_args!(
            "  url: {}",
            http_base(&record.host, record.port)
        ))?;
        output.stdout_line(format_args!(
            "  log: {}",
            store.paths().log_path().display()
        ))?;
        match fetch_info(&record.host, record.port) {
            Some(info) if info.pid == record.pid => {
                output.stdout_line(format_args!("  api: confirmed pid {}", info.pid))?;
            }
            Some(info) => output.stdout_line(format_args!(
                "  api: reports pid {} but the record says {}",
                info.pid, record.pid
            ))?,
            None => output.stdout_line(format_args!("  api: no answer from /api/info"))?,
        }
        Ok(())
    }

    /// Removes a stale record, but only when no other command holds the lock
    /// and the record is still stale once the lock is held.
    fn heal_stale<W: Write, E: Write>(
        &self,
        store: &RecordStore,
        record: &ServerRecord,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<(), LifecycleError> {
        let Some(_lock) = store.try_lock().map_err(LifecycleError::from_record)?
        else {
            output.stdout_line(format_args!(
                "server is not running (stale record for pid {}; another command is in progress)",
                record.pid
            ))?;
            return Ok(());
        };
        match self.inspect(store, output, false)? {
            ServerState::NotRunning => output.stdout_line(format_args!("server is not running")),
            ServerState::Running(current) => self.report_running(store, &current, output),
            ServerState::Stale(current) => {
                store.delete()?;
                output.stdout_line(format_args!(
                    "server is not running (removed stale record for pid {})",
                    current.pid
                ))
            }
        }
    }
}

fn busy_port(host: &str, port: u16) -> LifecycleError {
    LifecycleError::PortInUse {
        host: host.to_owned(),
        port,
        occupant: Occupant::Unknown {
            owner: port_owner(port),
            alternatives: suggest_alternatives(host, port, ALTERNATIVE_LIMIT),
        },
    }
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
