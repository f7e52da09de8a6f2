//! Per-digest mutual exclusion.
//!
//! Serialises the check-then-populate sequence of a store for one digest.
//! Tasks of the same process queue on an in-memory mutex; other processes
//! are excluded with an advisory lock on `<lock_dir>/<hex>.lock`. Lock files
//! are never deleted, since unlinking a lock file another process may be
//! waiting on would split the lock. In-memory entries are dropped once the
//! last task holding or waiting on them lets go.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use fs4::FileExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::oci::Digest;

type InFlight = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Registry of in-flight digests for one store root.
pub(crate) struct DigestLocks {
    lock_dir: PathBuf,
    in_flight: InFlight,
}

/// Held for as long as the digest is being populated.
pub(crate) struct DigestGuard {
    file: Option<File>,
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    in_flight: InFlight,
}

impl Drop for DigestGuard {
    fn drop(&mut self) {
        // Release the file lock before letting the next task in.
        drop(self.file.take());
        drop(self.guard.take());
        // Only the map itself still refers to the mutex: nobody waits on it.
        self.in_flight
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl DigestLocks {
    pub(crate) fn new(lock_dir: PathBuf) -> Self {
        Self {
            lock_dir,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Wait until this process and every other holds no lock on `digest`.
    pub(crate) async fn acquire(&self, digest: &Digest) -> io::Result<DigestGuard> {
        let key = digest.hex().to_string();
        let mutex = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = mutex.lock_owned().await;

        // From here on the guard owns the entry and cleans it up on failure.
        let mut digest_guard = DigestGuard {
            file: None,
            guard: Some(guard),
            key,
            in_flight: self.in_flight.clone(),
        };

        let path = self.lock_dir.join(format!("{}.lock", digest.hex()));
        let file = tokio::task::spawn_blocking(move || lock_file(&path))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        digest_guard.file = Some(file);

        tracing::trace!(digest = %digest, "Acquired digest lock");

        Ok(digest_guard)
    }
}

fn lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}
