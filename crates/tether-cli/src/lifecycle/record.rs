//! Persisted server record and the lock serialising mutating commands.
//!
//! The record is a claim about a running server, never proof of one: every
//! reader re-checks the pid through the process probe before trusting it.
//! Writes go through a temporary file in the same directory followed by a
//! rename, so a concurrent reader sees either the old record or the new one.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tether_config::StatePaths;
use tether_server::Engine;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::LIFECYCLE_TARGET;

/// Whether the server runs the development or the production engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Mode {
    Development,
    Production,
}

impl fmt::Display for Mode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => formatter.write_str("development"),
            Self::Production => formatter.write_str("production"),
        }
    }
}

/// The persisted description of the tracked server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ServerRecord {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub mode: Mode,
    pub engine: Engine,
}

impl ServerRecord {
    /// Time since launch; clock skew never yields a negative value.
    pub(crate) fn uptime(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(now - self.started_at).unwrap_or(Duration::ZERO)
    }
}

/// Errors raised by the record store.
#[derive(Debug, Error)]
pub(crate) enum RecordError {
    #[error("failed to read server record {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("server record {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write server record {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode server record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to remove {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to take lock {path:?}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("lock {path:?} is held{holder}")]
    Locked { path: PathBuf, holder: LockHolder },
}

/// Pid written into the lock file, when it could be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LockHolder(pub Option<u32>);

impl fmt::Display for LockHolder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(pid) => write!(formatter, " (pid {pid})"),
            None => Ok(()),
        }
    }
}

/// Store for the single server record of one state directory.
#[derive(Debug, Clone)]
pub(crate) struct RecordStore {
    paths: StatePaths,
}

impl RecordStore {
    pub(crate) const fn new(paths: StatePaths) -> Self {
        Self { paths }
    }

    pub(crate) const fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Atomically replaces the record.
    pub(crate) fn save(&self, record: &ServerRecord) -> Result<(), RecordError> {
        let path = self.paths.record_path();
        let write_error = |source| RecordError::Write {
            path: path.to_path_buf(),
            source,
        };
        let mut file = NamedTempFile::new_in(self.paths.state_dir()).map_err(write_error)?;
        serde_json::to_writer_pretty(file.as_file_mut(), record).map_err(RecordError::Encode)?;
        file.as_file_mut().write_all(b"\n").map_err(write_error)?;
        file.as_file().sync_all().map_err(write_error)?;
        file.persist(path)
            .map_err(|error| write_error(error.error))?;
        debug!(
            target: LIFECYCLE_TARGET,
            pid = record.pid,
            file = %path.display(),
            "server record written"
        );
        Ok(())
    }

    /// Loads the record, `None` when absent.
    pub(crate) fn load(&self) -> Result<Option<ServerRecord>, RecordError> {
        let path = self.paths.record_path();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RecordError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| RecordError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Removes the record; returns whether a file was deleted.
    pub(crate) fn delete(&self) -> Result<bool, RecordError> {
        remove_if_present(self.paths.record_path())
    }

    /// Takes the exclusive lock.
    ///
    /// The lock is an OS advisory lock on `server.lock`, released by the OS
    /// when the holder exits, so a crashed command never leaves it behind.
    /// The file itself is never removed.
    pub(crate) fn lock(&self) -> Result<StartLock, RecordError> {
        let path = self.paths.lock_path();
        let lock_error = |source| RecordError::Lock {
            path: path.to_path_buf(),
            source,
        };
        let file = open_lock_file(path).map_err(lock_error)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => StartLock::hold(path, file),
            Err(error) if is_contended(&error) => Err(RecordError::Locked {
                path: path.to_path_buf(),
                holder: LockHolder(read_holder(path)),
            }),
            Err(source) => Err(lock_error(source)),
        }
    }

    /// Like [`RecordStore::lock`] but yields `None` when another command
    /// holds the lock.
    pub(crate) fn try_lock(&self) -> Result<Option<StartLock>, RecordError> {
        match self.lock() {
            Ok(lock) => Ok(Some(lock)),
            Err(RecordError::Locked { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Exclusive claim on the state directory; released on drop.
#[derive(Debug)]
pub(crate) struct StartLock {
    path: PathBuf,
    file: File,
}

impl StartLock {
    fn hold(path: &Path, mut file: File) -> Result<Self, RecordError> {
        let lock_error = |source| RecordError::Lock {
            path: path.to_path_buf(),
            source,
        };
        file.set_len(0).map_err(lock_error)?;
        file.seek(SeekFrom::Start(0)).map_err(lock_error)?;
        writeln!(file, "{}", process::id()).map_err(lock_error)?;
        file.sync_all().map_err(lock_error)?;
        debug!(target: LIFECYCLE_TARGET, file = %path.display(), "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

impl Drop for StartLock {
    fn drop(&mut self) {
        if let Err(error) = FileExt::unlock(&self.file) {
            warn!(
                target: LIFECYCLE_TARGET,
                file = %self.path.display(),
                error = %error,
                "failed to release lock"
            );
        }
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn remove_if_present(path: &Path) -> Result<bool, RecordError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(RecordError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;
    use time::macros::datetime;

    use super::*;

    #[fixture]
    fn store() -> (TempDir, RecordStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = RecordStore::new(StatePaths::new(dir.path()));
        (dir, store)
    }

    fn sample() -> ServerRecord {
        ServerRecord {
            pid: 4242,
            host: String::from("0.0.0.0"),
            port: 9000,
            started_at: datetime!(2026-01-02 03:04:05 UTC),
            mode: Mode::Production,
            engine: Engine::ReusePort,
        }
    }

    #[rstest]
    fn save_then_load_preserves_every_field(store: (TempDir, RecordStore)) {
        let (_dir, store) = store;
        store.save(&sample()).expect("save");
        assert_eq!(store.load().expect("load"), Some(sample()));
    }

    #[rstest]
    fn saved_record_is_readable_json(store: (TempDir, RecordStore)) {
        let (_dir, store) = store;
        store.save(&sample()).expect("save");
        let text = fs::read_to_string(store.paths().record_path()).expect("read");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["mode"], "production");
        assert_eq!(value["engine"], "reuse_port");
        assert_eq!(value["started_at"], "2026-01-02T03:04:05Z");
    }

    #[rstest]
    fn save_leaves_no_temporary_files(store: (TempDir, RecordStore)) {
        let (dir, store) = store;
        store.save(&sample()).expect("first save");
        store.save(&sample()).expect("second save");
        let entries: Vec<_> = fs::read_dir(dir.path())
            .expect("list")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("server.pid")]);
    }

    #[rstest]
    fn missing_record_loads_as_none(store: (TempDir, RecordStore)) {
        let (_dir, store) = store;
        assert_eq!(store.load().expect("load"), None);
    }

    #[rstest]
    fn unparseable_record_is_corrupt(store: (TempDir, RecordStore)) {
        let (_dir, store) = store;
        fs::write(store.paths().record_path(), "{\"pid\": ").expect("write");
        let error = store.load().expect_err("corrupt");
        assert!(matches!(error, RecordError::Corrupt { .. }), "{error:?}");
    }

    #[rstest]
    fn delete_is_idempotent(store: (TempDir, RecordStore)) {
        let (_dir, store) = store;
        store.save(&sample()).expect("save");
        assert!(store.delete().expect("first delete"));
        assert!(!store.delete().expect("second delete"));
        assert_eq!(store.load().expect("load"), None);
    }

    #[rstest]
    fn uptime_never_goes_negative() {
        let record = sample();
        let before = datetime!(2026-01-01 00:00:00 UTC);
        let after = datetime!(2026-01-02 03:04:15 UTC);
        assert_eq!(record.uptime(before), Duration::ZERO);
        assert_eq!(record.uptime(after), Duration::from_secs(10));
    }

    #[rstest]
    fn lock_is_exclusive_while_held(store: (TempDir, RecordStore)) {
        let (_dir, store) = store;
        let lock = store.lock().expect("first lock");
        let error = store.lock().expect_err("second lock");
        assert!(
            matches!(
                error,
                RecordError::Locked {
                    holder: LockHolder(Some(pid)),
                    ..
                } if pid == process::id()
            ),
            "{error:?}"
        );
        assert!(store.try_lock().expect("try lock").is_none());
        drop(lock);
        assert!(store.paths().lock_path().exists(), "lock file is kept");
        store.lock().expect("lock after release");
    }

    #[rstest]
    fn lock_file_left_by_a_dead_command_is_free(store: (TempDir, RecordStore)) {
        let (_dir, store) = store;
        fs::write(store.paths().lock_path(), "999999\n").expect("write leftover lock");
        let lock = store.lock().expect("leftover file does not block");
        assert_eq!(read_holder(store.paths().lock_path()), Some(process::id()));
        drop(lock);
    }

    #[rstest]
    fn racing_commands_never_share_the_lock(store: (TempDir, RecordStore)) {
        const CONTENDERS: usize = 8;
        let (_dir, store) = store;
        fs::write(store.paths().lock_path(), "999999\n").expect("write leftover lock");
        let shared = Arc::new(store);
        let attempted = Arc::new(Barrier::new(CONTENDERS));
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..CONTENDERS)
            .map(|_| {
                let contender_store = Arc::clone(&shared);
                let contender_barrier = Arc::clone(&attempted);
                let contender_winners = Arc::clone(&winners);
                thread::spawn(move || {
                    let outcome = contender_store.lock();
                    if outcome.is_ok() {
                        contender_winners.fetch_add(1, Ordering::SeqCst);
                    }
                    // Every contender tries before any winner releases.
                    contender_barrier.wait();
                    drop(outcome);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("contender thread");
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
