//! Operator interrupts during a launch.
//!
//! The first SIGINT/SIGTERM only raises a flag that the readiness loop
//! polls, so the half-started child can be killed and reaped. A second signal
//! exits immediately.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag raised by the first interrupt.
#[derive(Debug, Clone, Default)]
pub(crate) struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// Registers the process-wide handlers.
    #[cfg(unix)]
    pub(crate) fn install() -> io::Result<Self> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::flag;

        let raised = Self::default();
        for signal in [SIGINT, SIGTERM] {
            flag::register_conditional_shutdown(signal, 1, Arc::clone(&raised.0))?;
            flag::register(signal, Arc::clone(&raised.0))?;
        }
        Ok(raised)
    }

    /// Ctrl-C keeps its default behaviour where signal flags are unavailable.
    #[cfg(not(unix))]
    pub(crate) fn install() -> io::Result<Self> {
        Ok(Self::default())
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}
