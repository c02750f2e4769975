//! In-memory process table standing in for the OS.
//!
//! [`FakeProbe`] and [`FakeLauncher`] share one [`FakeProcesses`] so a
//! launched fake server is immediately visible to liveness checks, and a
//! terminated one disappears.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use tether_server::Engine;
use time::OffsetDateTime;

use crate::lifecycle::{
    LaunchError, LaunchRequest, Launched, ProcessHandle, ProcessProbe, ServerLauncher,
    TerminationError,
};

const FIRST_FAKE_PID: u32 = 6000;

/// Scripted result for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeOutcome {
    Ready,
    Unavailable,
    ExitsEarly,
    PortBusy,
    NeverReady,
}

/// Shared fake process table.
#[derive(Debug)]
pub(crate) struct FakeProcesses {
    alive: RefCell<HashSet<u32>>,
    stubborn: RefCell<HashSet<u32>>,
    terminated: RefCell<Vec<u32>>,
    outcomes: RefCell<HashMap<Engine, FakeOutcome>>,
    attempts: RefCell<Vec<Engine>>,
    next_pid: Cell<u32>,
}

impl Default for FakeProcesses {
    fn default() -> Self {
        Self {
            alive: RefCell::default(),
            stubborn: RefCell::default(),
            terminated: RefCell::default(),
            outcomes: RefCell::default(),
            attempts: RefCell::default(),
            next_pid: Cell::new(FIRST_FAKE_PID),
        }
    }
}

impl FakeProcesses {
    pub(crate) fn spawn_alive(&self, pid: u32) {
        self.alive.borrow_mut().insert(pid);
    }

    /// Marks `pid` as ignoring every termination request.
    pub(crate) fn make_stubborn(&self, pid: u32) {
        self.stubborn.borrow_mut().insert(pid);
    }

    pub(crate) fn script(&self, engine: Engine, outcome: FakeOutcome) {
        self.outcomes.borrow_mut().insert(engine, outcome);
    }

    pub(crate) fn is_alive(&self, pid: u32) -> bool {
        self.alive.borrow().contains(&pid)
    }

    pub(crate) fn terminated(&self) -> Vec<u32> {
        self.terminated.borrow().clone()
    }

    pub(crate) fn attempts(&self) -> Vec<Engine> {
        self.attempts.borrow().clone()
    }

    fn allocate_pid(&self) -> u32 {
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        pid
    }
}

/// Probe answering from the fake table; ports are ignored.
#[derive(Debug, Clone)]
pub(crate) struct FakeProbe(pub Rc<FakeProcesses>);

impl ProcessProbe for FakeProbe {
    fn pid_exists(&self, pid: u32) -> bool {
        self.0.is_alive(pid)
    }

    fn is_alive(&self, pid: u32, _host: &str, _port: u16) -> bool {
        self.0.is_alive(pid)
    }

    fn terminate(&self, pid: u32, _grace: Duration) -> Result<(), TerminationError> {
        if self.0.stubborn.borrow().contains(&pid) {
            return Err(TerminationError::StillRunning { pid, waited_ms: 0 });
        }
        self.0.alive.borrow_mut().remove(&pid);
        self.0.terminated.borrow_mut().push(pid);
        Ok(())
    }
}

/// Launcher producing detached fake servers.
#[derive(Debug, Clone)]
pub(crate) struct FakeLauncher(pub Rc<FakeProcesses>);

impl ServerLauncher for FakeLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Launched, LaunchError> {
        self.0.attempts.borrow_mut().push(request.engine);
        let outcome = self
            .0
            .outcomes
            .borrow()
            .get(&request.engine)
            .copied()
            .unwrap_or(FakeOutcome::Ready);
        match outcome {
            FakeOutcome::Ready => {
                let pid = self.0.allocate_pid();
                self.0.spawn_alive(pid);
                Ok(Launched {
                    handle: ProcessHandle::Detached { pid },
                    engine: request.engine,
                    started_at: OffsetDateTime::now_utc(),
                })
            }
            FakeOutcome::Unavailable => Err(LaunchError::EngineUnavailable {
                engine: request.engine,
            }),
            FakeOutcome::ExitsEarly => Err(LaunchError::ExitedEarly {
                engine: request.engine,
                status: Some(1),
            }),
            FakeOutcome::PortBusy => Err(LaunchError::PortInUse {
                host: request.host.to_owned(),
                port: request.port,
            }),
            FakeOutcome::NeverReady => Err(LaunchError::Timeout {
                pid: self.0.allocate_pid(),
                port: request.port,
                timeout_ms: request.timeout_ms(),
            }),
        }
    }
}
