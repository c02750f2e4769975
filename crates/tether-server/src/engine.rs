//! Server engines and their availability rules.

use std::env;
use std::num::NonZeroUsize;
use std::thread;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::errors::ServeError;

/// Comma-separated engine names the payload refuses to run.
pub const DISABLED_ENGINES_ENV: &str = "TETHER_DISABLED_ENGINES";

const MAX_WORKERS: usize = 4;

/// Concrete HTTP engine used to serve the payload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Engine {
    /// Single-threaded runtime intended for local development.
    Development,
    /// Multi-threaded runtime with one listener. Runs everywhere.
    Threaded,
    /// Multi-threaded runtime with several `SO_REUSEPORT` listeners sharing
    /// the port. POSIX only.
    ReusePort,
}

impl Engine {
    /// Whether the engine can run on the current platform at all.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        match self {
            Self::ReusePort => cfg!(unix),
            Self::Development | Self::Threaded => true,
        }
    }

    /// Worker threads for multi-threaded engines and the listener count for
    /// [`Engine::ReusePort`].
    #[must_use]
    pub fn workers(self) -> usize {
        match self {
            Self::Development => 1,
            Self::Threaded | Self::ReusePort => thread::available_parallelism()
                .map_or(1, NonZeroUsize::get)
                .clamp(2, MAX_WORKERS),
        }
    }

    /// Fails when the engine is unsupported here or disabled through
    /// [`DISABLED_ENGINES_ENV`].
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::EngineUnsupported`] or
    /// [`ServeError::EngineDisabled`].
    pub fn ensure_available(self) -> Result<(), ServeError> {
        if !self.is_supported() {
            return Err(ServeError::EngineUnsupported { engine: self });
        }
        let disabled = env::var(DISABLED_ENGINES_ENV).unwrap_or_default();
        if disabled_in(self, &disabled) {
            return Err(ServeError::EngineDisabled { engine: self });
        }
        Ok(())
    }
}

/// Reports whether `engine` appears in a comma-separated disable list.
#[must_use]
pub fn disabled_in(engine: Engine, list: &str) -> bool {
    let name = engine.to_string();
    list.split(',')
        .map(str::trim)
        .any(|entry| entry.eq_ignore_ascii_case(&name))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::development("development", Engine::Development)]
    #[case::threaded("threaded", Engine::Threaded)]
    #[case::reuse_port("reuse_port", Engine::ReusePort)]
    fn engine_names_round_trip_through_text(#[case] name: &str, #[case] engine: Engine) {
        assert_eq!(Engine::from_str(name).expect("parse"), engine);
        assert_eq!(engine.to_string(), name);
    }

    #[rstest]
    #[case::exact("reuse_port", true)]
    #[case::listed("threaded, reuse_port", true)]
    #[case::case_insensitive("REUSE_PORT", true)]
    #[case::other("threaded", false)]
    #[case::empty("", false)]
    fn disable_list_matching(#[case] list: &str, #[case] expected: bool) {
        assert_eq!(disabled_in(Engine::ReusePort, list), expected);
    }

    #[test]
    fn development_runs_single_worker() {
        assert_eq!(Engine::Development.workers(), 1);
        assert!(Engine::Threaded.workers() >= 2);
    }

    #[test]
    fn reuse_port_support_follows_platform() {
        assert_eq!(Engine::ReusePort.is_supported(), cfg!(unix));
        assert!(Engine::Threaded.is_supported());
    }
}
