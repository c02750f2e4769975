//! Test support utilities for tether CLI behavioural coverage.
//!
//! The world drives the real CLI runtime and lifecycle controller against an
//! in-memory process table, with the state directory in a temporary
//! directory and a port nobody else is listening on.

mod doubles;

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::net::TcpListener;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result, ensure};
use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;
use tether_config::{Config, StatePaths};
use tether_server::Engine;
use time::OffsetDateTime;

use crate::lifecycle::{
    LifecycleController, LifecycleError, Mode, Platform, RecordStore, ServerRecord, StartLock,
};
use crate::{AppError, ConfigLoader, IoStreams, run_with_handler};

use doubles::{FakeLauncher, FakeProbe, FakeProcesses};
pub(super) use doubles::FakeOutcome;

/// Placeholder in feature text replaced by the world's port.
pub(super) const PORT_PLACEHOLDER: &str = "PORT";

/// A config loader that returns a fixed configuration for tests.
pub(super) struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub(super) fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// Test world holding the state directory, fake processes, and captured
/// output of the last command.
pub(super) struct TestWorld {
    pub config: Config,
    pub port: u16,
    pub processes: Rc<FakeProcesses>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<ExitCode>,
    pub error_kind: Option<String>,
    squatter: Option<TcpListener>,
    held_lock: Option<StartLock>,
    _temp_dir: TempDir,
}

impl TestWorld {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let state_dir = Utf8PathBuf::from_path_buf(temp_dir.path().join("state"))
            .map_err(|path| anyhow::anyhow!("non UTF-8 temp path {}", path.display()))?;
        let config = Config {
            state_dir,
            log_filter: String::from("off"),
            readiness_timeout_ms: 500,
            grace_period_ms: 50,
            ..Config::default()
        };
        Ok(Self {
            config,
            port: free_port()?,
            processes: Rc::new(FakeProcesses::default()),
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
            error_kind: None,
            squatter: None,
            held_lock: None,
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Result<RecordStore> {
        Ok(RecordStore::new(StatePaths::from_config(&self.config)?))
    }

    pub fn record(&self, pid: u32) -> ServerRecord {
        ServerRecord {
            pid,
            host: String::from("127.0.0.1"),
            port: self.port,
            started_at: OffsetDateTime::now_utc(),
            mode: Mode::Development,
            engine: Engine::Development,
        }
    }

    /// Persists a record for `pid`, marking it alive when asked.
    pub fn seed_record(&self, pid: u32, alive: bool) -> Result<()> {
        self.store()?.save(&self.record(pid))?;
        if alive {
            self.processes.spawn_alive(pid);
        }
        Ok(())
    }

    pub fn seed_corrupt_record(&self) -> Result<()> {
        let store = self.store()?;
        fs::write(store.paths().record_path(), "{ not json")?;
        Ok(())
    }

    /// Takes the start lock the way a concurrent command would.
    pub fn hold_start_lock(&mut self) -> Result<()> {
        ensure!(self.held_lock.is_none(), "start lock already held");
        self.held_lock = Some(self.store()?.lock()?);
        Ok(())
    }

    /// Occupies the port with a listener tether knows nothing about.
    pub fn squat_port(&mut self) -> Result<()> {
        ensure!(self.squatter.is_none(), "port {} already occupied", self.port);
        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .with_context(|| format!("bind port {}", self.port))?;
        self.squatter = Some(listener);
        Ok(())
    }

    pub fn substitute(&self, text: &str) -> String {
        text.trim()
            .trim_matches('"')
            .replace(PORT_PLACEHOLDER, &self.port.to_string())
    }

    pub fn run(&mut self, command: &str) -> Result<()> {
        self.stdout.clear();
        self.stderr.clear();
        self.error_kind = None;
        let args = self.build_args(command);
        let loader = StaticConfigLoader::new(self.config.clone());
        let controller = LifecycleController::new(
            FakeProbe(Rc::clone(&self.processes)),
            FakeLauncher(Rc::clone(&self.processes)),
            Platform::Posix,
        );
        let mut error_kind = None;
        let mut io = IoStreams::new(&mut self.stdout, &mut self.stderr);
        let exit = run_with_handler(
            args,
            &mut io,
            &loader,
            None,
            |invocation, context, output| {
                let result = controller.handle(invocation, context.config, output);
                if let Err(error) = &result {
                    error_kind = Some(variant_name(error));
                }
                result
            },
        );
        self.exit_code = Some(exit);
        self.error_kind = error_kind;
        Ok(())
    }

    fn build_args(&self, command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("tether")];
        args.extend(
            self.substitute(command)
                .split_whitespace()
                .map(OsString::from),
        );
        args
    }

    pub fn stdout_text(&self) -> Result<String> {
        decode_utf8(self.stdout.clone(), "stdout")
    }

    pub fn stderr_text(&self) -> Result<String> {
        decode_utf8(self.stderr.clone(), "stderr")
    }

    pub fn assert_success(&self) -> Result<()> {
        let exit = self.exit_code.context("exit code recorded")?;
        ensure!(
            exit == ExitCode::SUCCESS,
            "expected success, got {exit:?}; stderr: {}",
            self.stderr_text()?
        );
        Ok(())
    }

    pub fn assert_failure(&self) -> Result<()> {
        let exit = self.exit_code.context("exit code recorded")?;
        ensure!(
            exit == ExitCode::FAILURE,
            "expected failure exit code, got {exit:?}"
        );
        Ok(())
    }

    pub fn assert_error_kind(&self, expected: &str) -> Result<()> {
        self.assert_failure()?;
        let actual = self.error_kind.as_deref().context("no lifecycle error")?;
        ensure!(
            actual == expected,
            "expected {expected} error, got {actual}; stderr: {}",
            self.stderr_text()?
        );
        Ok(())
    }

    pub fn current_record(&self) -> Result<Option<ServerRecord>> {
        Ok(self.store()?.load()?)
    }
}

/// Name of the outermost variant, e.g. `PortInUse`.
pub(super) fn variant_name(error: &LifecycleError) -> String {
    format!("{error:?}")
        .chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect()
}

/// Asks the OS for a port that is free right now.
pub(super) fn free_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

pub(super) fn decode_utf8(buffer: Vec<u8>, label: &str) -> Result<String> {
    String::from_utf8(buffer).with_context(|| format!("{label} utf8"))
}

#[fixture]
pub(super) fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new().expect("test world"))
}
