//! Content-addressed store of unpacked layers.
//!
//! Each layer is unpacked once under `root/<digest hex>/` and shared by
//! every image that references it. The existence of that directory is the
//! cache-hit decision; it is only ever created by renaming a fully
//! unpacked staging directory into place.

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use layerdb_core::error::{LayerdbError, Result};

use super::lock::DigestLocks;
use super::{create_staging, list_records, publish, record_exists, CacheOutcome, LOCKS_DIR};
use crate::oci::layers::unpack;
use crate::oci::Digest;

/// Uncompressed layer archive stream.
pub type LayerReader = Box<dyn Read + Send>;

/// Provides the uncompressed archive of a layer by digest.
#[async_trait]
pub trait LayerSource: Send + Sync {
    /// Open the uncompressed tar stream of the layer with `digest`.
    async fn open_layer(&self, digest: &Digest) -> Result<LayerReader>;
}

/// Content-addressed store of unpacked layers.
pub struct LayerStore {
    /// Root directory for layers (e.g., ~/.layerdb/layerdb)
    root: PathBuf,
    locks: DigestLocks,
}

impl LayerStore {
    /// Open a layer store, creating its root directory if needed.
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            LayerdbError::ConfigError(format!(
                "Failed to create layer store directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            locks: DigestLocks::new(root.join(LOCKS_DIR)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the unpacked tree of `digest`.
    pub fn layer_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.hex())
    }

    /// Whether the layer is present in the store.
    pub fn contains(&self, digest: &Digest) -> Result<bool> {
        let path = self.layer_path(digest);
        record_exists(&path).map_err(|e| {
            layer_error(
                digest,
                format!("Failed to check layer cache {}: {}", path.display(), e),
            )
        })
    }

    /// Make sure the layer with `digest` is unpacked in the store.
    ///
    /// Returns [`CacheOutcome::AlreadyCached`] without touching `source` if
    /// the layer directory exists. Otherwise opens the layer stream from
    /// `source`, unpacks it into a staging directory and publishes it.
    /// A failed unpack leaves no layer directory behind.
    pub async fn ensure_layer<S>(&self, digest: &Digest, source: &S) -> Result<CacheOutcome>
    where
        S: LayerSource + ?Sized,
    {
        if self.contains(digest)? {
            tracing::debug!(digest = %digest, "Layer found in cache");
            return Ok(CacheOutcome::AlreadyCached);
        }

        let _guard = self
            .locks
            .acquire(digest)
            .await
            .map_err(|e| layer_error(digest, format!("Failed to lock layer: {}", e)))?;

        // Another task or process may have published it while we waited.
        if self.contains(digest)? {
            tracing::debug!(digest = %digest, "Layer published concurrently");
            return Ok(CacheOutcome::AlreadyCached);
        }

        let staging = create_staging(&self.root, digest).map_err(|e| {
            layer_error(
                digest,
                format!("Failed to create staging directory: {}", e),
            )
        })?;

        let reader = source.open_layer(digest).await?;
        let staging_path = staging.path().to_path_buf();
        let summary = tokio::task::spawn_blocking(move || unpack(reader, &staging_path))
            .await
            .map_err(|e| layer_error(digest, format!("Unpack task failed: {}", e)))??;

        let target = self.layer_path(digest);
        publish(staging, &target).map_err(|e| {
            layer_error(
                digest,
                format!("Failed to publish layer to {}: {}", target.display(), e),
            )
        })?;

        tracing::info!(
            digest = %digest,
            files = summary.files,
            directories = summary.directories,
            symlinks = summary.symlinks,
            skipped = summary.skipped,
            path = %target.display(),
            "Layer unpacked"
        );

        Ok(CacheOutcome::Fetched)
    }

    /// Digest hex names of all layers in the store.
    pub fn list(&self) -> Result<Vec<String>> {
        list_records(&self.root).map_err(|e| {
            LayerdbError::Other(format!(
                "Failed to list layer store {}: {}",
                self.root.display(),
                e
            ))
        })
    }
}

fn layer_error(digest: &Digest, message: impl Into<String>) -> LayerdbError {
    LayerdbError::LayerStoreError {
        digest: digest.to_string(),
        message: message.into(),
    }
}
