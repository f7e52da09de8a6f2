//! Content-addressed stores.
//!
//! Both stores key records by digest hex under their root and share the
//! same publication protocol: a record is populated in
//! `<root>/.staging/<hex>-XXXX` and moved to `<root>/<hex>` with a single
//! rename, so a record directory only ever exists in complete form.
//! Population is guarded per digest by [`lock::DigestLocks`].

pub mod layer_store;
pub(crate) mod lock;

pub use layer_store::{LayerReader, LayerSource, LayerStore};

use std::fs;
use std::io;
use std::path::Path;

use tempfile::TempDir;

use crate::oci::Digest;

/// Staging area for records being populated.
pub(crate) const STAGING_DIR: &str = ".staging";

/// Lock files for per-digest exclusion.
pub(crate) const LOCKS_DIR: &str = ".locks";

/// Result of an ensure operation on a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The record was already present; nothing was written.
    AlreadyCached,
    /// The record was created by this call.
    Fetched,
}

impl CacheOutcome {
    pub fn is_cached(&self) -> bool {
        matches!(self, CacheOutcome::AlreadyCached)
    }
}

/// Whether a record directory exists at `path`.
///
/// Only "not found" counts as absent; any other failure is returned.
pub(crate) fn record_exists(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(true),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} exists but is not a directory", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create a fresh staging directory for `digest` under `root`.
///
/// The directory is removed when the returned guard is dropped unless it
/// was published first.
pub(crate) fn create_staging(root: &Path, digest: &Digest) -> io::Result<TempDir> {
    let staging_root = root.join(STAGING_DIR);
    fs::create_dir_all(&staging_root)?;
    tempfile::Builder::new()
        .prefix(&format!("{}-", digest.hex()))
        .tempdir_in(&staging_root)
}

/// Move a populated staging directory to its final record path.
pub(crate) fn publish(staging: TempDir, target: &Path) -> io::Result<()> {
    fs::rename(staging.path(), target)?;
    // The guard now points at a vanished path; dropping it is a no-op.
    drop(staging);
    Ok(())
}

/// Digest hex names of all published records under `root`.
pub(crate) fn list_records(root: &Path) -> io::Result<Vec<String>> {
    let mut records = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.file_type()?.is_dir() {
            continue;
        }
        records.push(name);
    }
    records.sort();
    Ok(records)
}
