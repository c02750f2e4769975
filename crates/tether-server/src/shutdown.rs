//! Shutdown signal fan-out for the server loops.
//!
//! On Unix a dedicated thread blocks on `signal-hook` and flips a watch
//! channel; every listener's graceful-shutdown future waits on that channel.
//! Elsewhere Ctrl-C is observed through tokio.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::SERVER_TARGET;
use crate::errors::ServeError;

#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates a signal that only fires when triggered explicitly.
    pub(crate) fn manual() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Creates a signal wired to the process termination signals.
    pub(crate) fn install() -> Result<Self, ServeError> {
        let signal = Self::manual();
        signal.listen()?;
        Ok(signal)
    }

    #[cfg(unix)]
    fn listen(&self) -> Result<(), ServeError> {
        use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP]).map_err(ServeError::Signals)?;
        let trigger = self.clone();
        std::thread::Builder::new()
            .name(String::from("tether-signals"))
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(target: SERVER_TARGET, signal, "shutdown signal received");
                    trigger.trigger();
                }
            })
            .map(drop)
            .map_err(ServeError::Signals)
    }

    #[cfg(not(unix))]
    fn listen(&self) -> Result<(), ServeError> {
        let trigger = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(target: SERVER_TARGET, "ctrl-c received");
                trigger.trigger();
            }
        });
        Ok(())
    }

    pub(crate) fn trigger(&self) {
        self.sender.send_replace(true);
    }

    /// Resolves once shutdown has been requested.
    pub(crate) fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        async move {
            // A closed channel also means nobody can request shutdown anymore.
            let _ = receiver.wait_for(|stop| *stop).await.map(drop);
        }
    }
}
