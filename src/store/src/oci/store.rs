//! Disk-based image metadata store.
//!
//! Persists the manifest and config of each pulled image under
//! `<root>/<digest hex>/{manifest.json,config.json}`. Records are written
//! once through a staging directory and never modified afterwards.

use std::path::{Path, PathBuf};

use layerdb_core::error::{LayerdbError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::digest::Digest;
use crate::cache::lock::DigestLocks;
use crate::cache::{create_staging, list_records, publish, record_exists, CacheOutcome, LOCKS_DIR};

/// File name of the serialized manifest inside a record.
pub const MANIFEST_FILE: &str = "manifest.json";

/// File name of the serialized config inside a record.
pub const CONFIG_FILE: &str = "config.json";

/// A manifest/config pair read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord<M, C> {
    pub digest: Digest,
    pub manifest: M,
    pub config: C,
}

/// Image metadata store keyed by image digest.
pub struct ImageStore {
    /// Root directory for image records (e.g., ~/.layerdb/imagedb)
    root: PathBuf,
    locks: DigestLocks,
}

impl ImageStore {
    /// Open an image store, creating its root directory if needed.
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            LayerdbError::ConfigError(format!(
                "Failed to create image store directory {}: {}",
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

    /// Directory holding the record of `digest`.
    pub fn record_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.hex())
    }

    /// Whether a record for `digest` is present.
    pub fn contains(&self, digest: &Digest) -> Result<bool> {
        let path = self.record_path(digest);
        record_exists(&path).map_err(|e| {
            image_error(
                digest,
                format!("Failed to check image cache {}: {}", path.display(), e),
            )
        })
    }

    /// Persist `manifest` and `config` for `digest` unless already present.
    ///
    /// Both documents are written as indented JSON. A present record is
    /// reported as [`CacheOutcome::AlreadyCached`] and left untouched.
    pub async fn ensure_image<M, C>(
        &self,
        digest: &Digest,
        manifest: &M,
        config: &C,
    ) -> Result<CacheOutcome>
    where
        M: Serialize + ?Sized,
        C: Serialize + ?Sized,
    {
        if self.contains(digest)? {
            tracing::debug!(digest = %digest, "Image found in cache");
            return Ok(CacheOutcome::AlreadyCached);
        }

        let manifest_json = serde_json::to_string_pretty(manifest).map_err(|e| {
            image_error(digest, format!("Failed to serialize manifest: {}", e))
        })?;
        let config_json = serde_json::to_string_pretty(config)
            .map_err(|e| image_error(digest, format!("Failed to serialize config: {}", e)))?;

        let _guard = self
            .locks
            .acquire(digest)
            .await
            .map_err(|e| image_error(digest, format!("Failed to lock image: {}", e)))?;

        if self.contains(digest)? {
            tracing::debug!(digest = %digest, "Image published concurrently");
            return Ok(CacheOutcome::AlreadyCached);
        }

        let staging = create_staging(&self.root, digest).map_err(|e| {
            image_error(
                digest,
                format!("Failed to create staging directory: {}", e),
            )
        })?;

        for (name, contents) in [(MANIFEST_FILE, &manifest_json), (CONFIG_FILE, &config_json)] {
            let path = staging.path().join(name);
            tokio::fs::write(&path, contents).await.map_err(|e| {
                image_error(digest, format!("Failed to write {}: {}", path.display(), e))
            })?;
        }

        let target = self.record_path(digest);
        publish(staging, &target).map_err(|e| {
            image_error(
                digest,
                format!("Failed to publish image to {}: {}", target.display(), e),
            )
        })?;

        tracing::info!(digest = %digest, path = %target.display(), "Image stored");
        Ok(CacheOutcome::Fetched)
    }

    /// Read a stored record back.
    pub fn load<M, C>(&self, digest: &Digest) -> Result<ImageRecord<M, C>>
    where
        M: DeserializeOwned,
        C: DeserializeOwned,
    {
        let dir = self.record_path(digest);
        Ok(ImageRecord {
            digest: digest.clone(),
            manifest: read_json(digest, &dir.join(MANIFEST_FILE))?,
            config: read_json(digest, &dir.join(CONFIG_FILE))?,
        })
    }

    /// Digests of all stored images.
    pub fn list(&self) -> Result<Vec<Digest>> {
        let names = list_records(&self.root).map_err(|e| {
            LayerdbError::Other(format!(
                "Failed to list image store {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut digests = Vec::with_capacity(names.len());
        for name in names {
            match Digest::from_hex(&name) {
                Ok(digest) => digests.push(digest),
                Err(e) => tracing::warn!(name = %name, error = %e, "Ignoring unknown entry"),
            }
        }
        Ok(digests)
    }
}

fn read_json<T: DeserializeOwned>(digest: &Digest, path: &Path) -> Result<T> {
    let data = std::fs::read(path)
        .map_err(|e| image_error(digest, format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&data)
        .map_err(|e| image_error(digest, format!("Failed to parse {}: {}", path.display(), e)))
}

fn image_error(digest: &Digest, message: impl Into<String>) -> LayerdbError {
    LayerdbError::ImageStoreError {
        digest: digest.to_string(),
        message: message.into(),
    }
}
