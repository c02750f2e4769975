//! Runtime construction, socket binding, and the serve loop.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::process;

use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinSet;
use tracing::info;

use crate::SERVER_TARGET;
use crate::engine::Engine;
use crate::errors::ServeError;
use crate::routes::{AppState, router};
use crate::shutdown::ShutdownSignal;

/// Bind target and engine for one payload run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub engine: Engine,
}

/// Runs the payload until a shutdown signal arrives.
///
/// # Errors
///
/// Returns a [`ServeError`] whose [`ServeError::exit_code`] tells the
/// launcher whether to try another engine.
pub fn run(options: &ServeOptions) -> Result<(), ServeError> {
    options.engine.ensure_available()?;
    let runtime = build_runtime(options.engine)?;
    runtime.block_on(async {
        let shutdown = ShutdownSignal::install()?;
        serve(options, &shutdown).await
    })
}

fn build_runtime(engine: Engine) -> Result<Runtime, ServeError> {
    let mut builder = match engine {
        Engine::Development => Builder::new_current_thread(),
        Engine::Threaded | Engine::ReusePort => {
            let mut builder = Builder::new_multi_thread();
            builder.worker_threads(engine.workers());
            builder
        }
    };
    builder
        .enable_all()
        .thread_name("tether-worker")
        .build()
        .map_err(|source| ServeError::Runtime { engine, source })
}

pub(crate) async fn serve(
    options: &ServeOptions,
    shutdown: &ShutdownSignal,
) -> Result<(), ServeError> {
    let listeners = bind_listeners(options)?;
    let app = router(AppState::new(options.engine));
    info!(
        target: SERVER_TARGET,
        pid = process::id(),
        engine = %options.engine,
        host = %options.host,
        port = options.port,
        listeners = listeners.len(),
        "server listening"
    );

    let mut tasks = JoinSet::new();
    for listener in listeners {
        let app = app.clone();
        let stop = shutdown.wait();
        tasks.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop)
                .await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined
            .map_err(|error| ServeError::Serve(io::Error::other(error)))?
            .map_err(ServeError::Serve)?;
    }
    info!(target: SERVER_TARGET, pid = process::id(), "server stopped");
    Ok(())
}

pub(crate) fn bind_listeners(options: &ServeOptions) -> Result<Vec<TcpListener>, ServeError> {
    let address = resolve(&options.host, options.port)?;
    match options.engine {
        Engine::Development | Engine::Threaded => Ok(vec![bind_single(address)?]),
        Engine::ReusePort => bind_reuse_port(address, options.engine.workers()),
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ServeError> {
    let resolve_error = |source| ServeError::Resolve {
        host: host.to_owned(),
        port,
        source,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| resolve_error(io::Error::from(io::ErrorKind::AddrNotAvailable)))
}

fn bind_single(address: SocketAddr) -> Result<TcpListener, ServeError> {
    let bind = || -> io::Result<TcpListener> {
        let listener = std::net::TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        TcpListener::from_std(listener)
    };
    bind().map_err(|source| ServeError::from_bind(address.to_string(), source))
}

#[cfg(unix)]
fn bind_reuse_port(address: SocketAddr, count: usize) -> Result<Vec<TcpListener>, ServeError> {
    use socket2::{Domain, Protocol, Socket, Type};

    let bind_one = || -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&address.into())?;
        socket.listen(1024)?;
        TcpListener::from_std(socket.into())
    };
    (0..count)
        .map(|_| bind_one().map_err(|source| ServeError::from_bind(address.to_string(), source)))
        .collect()
}

#[cfg(not(unix))]
fn bind_reuse_port(_address: SocketAddr, _count: usize) -> Result<Vec<TcpListener>, ServeError> {
    Err(ServeError::EngineUnsupported {
        engine: Engine::ReusePort,
    })
}
