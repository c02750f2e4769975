//! TCP port probing.
//!
//! A probe opens and immediately closes a connection; it never binds, so it
//! cannot steal a port from the server it is looking for. When a port is
//! busy, the OS socket table may also name the process listening on it.

use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tracing::debug;

use super::LIFECYCLE_TARGET;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const ALTERNATIVE_SPAN: u16 = 10;

/// Reports whether something accepts TCP connections on `host:port`.
pub(crate) fn is_port_open(host: &str, port: u16) -> bool {
    let addresses: Vec<SocketAddr> = match (connect_host(host), port).to_socket_addrs() {
        Ok(addresses) => addresses.collect(),
        Err(error) => {
            debug!(target: LIFECYCLE_TARGET, host, port, error = %error, "probe address did not resolve");
            return false;
        }
    };
    addresses
        .iter()
        .any(|address| match TcpStream::connect_timeout(address, CONNECT_TIMEOUT) {
            Ok(_) => true,
            Err(error) => {
                debug!(target: LIFECYCLE_TARGET, %address, error = %error, "port probe failed");
                false
            }
        })
}

/// Lists up to `limit` ports after `port` on which nothing is listening.
pub(crate) fn suggest_alternatives(host: &str, port: u16, limit: usize) -> Vec<u16> {
    let first = u32::from(port) + 1;
    (first..first + u32::from(ALTERNATIVE_SPAN))
        .filter_map(|candidate| u16::try_from(candidate).ok())
        .filter(|candidate| !is_port_open(host, *candidate))
        .take(limit)
        .collect()
}

/// A process found listening on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PortOwner {
    pub(crate) pid: u32,
    pub(crate) name: String,
}

impl fmt::Display for PortOwner {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(formatter, "pid {}", self.pid)
        } else {
            write!(formatter, "{} (pid {})", self.name, self.pid)
        }
    }
}

/// Names the process listening on `port`, if the socket table shows one.
///
/// Sockets of other users may be hidden without elevated privileges, so a
/// `None` does not mean the port is free.
pub(crate) fn port_owner(port: u16) -> Option<PortOwner> {
    let listeners = match listeners::get_all() {
        Ok(listeners) => listeners,
        Err(error) => {
            debug!(target: LIFECYCLE_TARGET, port, error = %error, "socket table unavailable");
            return None;
        }
    };
    let listener = listeners
        .into_iter()
        .find(|listener| listener.socket.port() == port)?;
    let pid = listener.process.pid;
    let name = if listener.process.name.is_empty() {
        process_name(pid).unwrap_or_default()
    } else {
        listener.process.name
    };
    Some(PortOwner { pid, name })
}

fn process_name(pid: u32) -> Option<String> {
    let sys_pid = SysPid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    system
        .process(sys_pid)
        .map(|process| process.name().to_string_lossy().into_owned())
}

/// Base URL for the server, bracketing IPv6 literals.
pub(crate) fn http_base(host: &str, port: u16) -> String {
    let target = connect_host(host);
    if target.contains(':') {
        format!("http://[{target}]:{port}")
    } else {
        format!("http://{target}:{port}")
    }
}

/// Maps wildcard bind addresses onto the loopback of the same family.
fn connect_host(host: &str) -> &str {
    match host.trim_matches(['[', ']']) {
        "" | "0.0.0.0" => "127.0.0.1",
        "::" => "::1",
        other => other,
    }
}
