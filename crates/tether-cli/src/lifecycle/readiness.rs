//! Readiness polling against a freshly spawned server.

use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use tether_server::{EXIT_ENGINE_UNAVAILABLE, EXIT_PORT_IN_USE, HealthResponse, InfoResponse};
use tracing::debug;

use super::LIFECYCLE_TARGET;
use super::interrupt::InterruptFlag;
use super::launcher::{LaunchError, LaunchRequest};
use super::port::http_base;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
const HEALTHY: &str = "healthy";

/// Polls `/health` until the child answers with its own pid.
///
/// The child is killed and reaped on timeout or interrupt; an early exit is
/// classified through the payload's exit-code contract.
pub(super) fn wait_for_ready(
    child: &mut Child,
    request: &LaunchRequest<'_>,
    interrupt: &InterruptFlag,
) -> Result<(), LaunchError> {
    let pid = child.id();
    let agent = agent();
    let url = format!("{}/health", http_base(request.host, request.port));
    let deadline = Instant::now() + request.readiness_timeout;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if interrupt.is_raised() {
            discard(child);
            return Err(LaunchError::Interrupted { pid });
        }
        if let Some(status) = child
            .try_wait()
            .map_err(|source| LaunchError::Monitor { source })?
        {
            return Err(classify_exit(status, request));
        }
        if probe_health(&agent, &url, pid) {
            debug!(target: LIFECYCLE_TARGET, pid, %url, "server reported healthy");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            discard(child);
            return Err(LaunchError::Timeout {
                pid,
                port: request.port,
                timeout_ms: request.timeout_ms(),
            });
        }
        thread::sleep(backoff.min(deadline - now));
        backoff = backoff.saturating_mul(2).min(MAX_BACKOFF);
    }
}

/// Reads `/api/info`, `None` when the server does not answer.
pub(super) fn fetch_info(host: &str, port: u16) -> Option<InfoResponse> {
    let url = format!("{}/api/info", http_base(host, port));
    let mut response = agent().get(&url).call().ok()?;
    response.body_mut().read_json().ok()
}

/// Maps a premature exit onto the launch taxonomy.
pub(super) fn classify_exit(status: ExitStatus, request: &LaunchRequest<'_>) -> LaunchError {
    let code = status.code();
    match code.and_then(|raw| u8::try_from(raw).ok()) {
        Some(EXIT_PORT_IN_USE) => LaunchError::PortInUse {
            host: request.host.to_owned(),
            port: request.port,
        },
        Some(EXIT_ENGINE_UNAVAILABLE) => LaunchError::EngineUnavailable {
            engine: request.engine,
        },
        _ => LaunchError::ExitedEarly {
            engine: request.engine,
            status: code,
        },
    }
}

fn agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(REQUEST_TIMEOUT))
        .proxy(None)
        .build()
        .into()
}

fn probe_health(agent: &ureq::Agent, url: &str, pid: u32) -> bool {
    let health: HealthResponse = match agent.get(url).call() {
        Ok(mut response) => match response.body_mut().read_json() {
            Ok(health) => health,
            Err(error) => {
                debug!(target: LIFECYCLE_TARGET, error = %error, "unreadable health response");
                return false;
            }
        },
        Err(error) => {
            debug!(target: LIFECYCLE_TARGET, error = %error, "health probe failed");
            return false;
        }
    };
    health.status == HEALTHY && health.pid == pid
}

fn discard(child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!(target: LIFECYCLE_TARGET, pid = child.id(), error = %error, "kill failed");
    }
    if let Err(error) = child.wait() {
        debug!(target: LIFECYCLE_TARGET, pid = child.id(), error = %error, "reap failed");
    }
}
