//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use layerdb_core::error::{LayerdbError, Result};
use oci_distribution::manifest::OciImageManifest;
use serde_json::json;
use tar::{Builder, EntryType, Header};

use crate::cache::{LayerReader, LayerSource};
use crate::oci::{Digest, ImageHandle};

/// In-memory tar archive for tests.
pub(crate) struct TestArchive {
    builder: Builder<Vec<u8>>,
}

impl TestArchive {
    pub(crate) fn new() -> Self {
        Self {
            builder: Builder::new(Vec::new()),
        }
    }

    pub(crate) fn dir(mut self, name: &str) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        self.builder
            .append_data(&mut header, name, io::empty())
            .unwrap();
        self
    }

    pub(crate) fn file(self, name: &str, content: &[u8]) -> Self {
        self.file_with_mode(name, content, 0o644)
    }

    pub(crate) fn file_with_mode(mut self, name: &str, content: &[u8], mode: u32) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(mode);
        self.builder
            .append_data(&mut header, name, content)
            .unwrap();
        self
    }

    /// Entry whose name bypasses the builder's path validation.
    pub(crate) fn raw(mut self, name: &str, entry_type: EntryType, content: &[u8]) -> Self {
        let mut header = Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name.len()].copy_from_slice(name.as_bytes());
        }
        header.set_entry_type(entry_type);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        self.builder.append(&header, content).unwrap();
        self
    }

    pub(crate) fn symlink(mut self, name: &str, link: &str) -> Self {
        let mut header = Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            gnu.linkname[..link.len()].copy_from_slice(link.as_bytes());
        }
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        self.builder
            .append_data(&mut header, name, io::empty())
            .unwrap();
        self
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.builder.into_inner().unwrap()
    }
}


/// In-memory image whose layers are uncompressed tar archives.
///
/// Counts how often each layer is opened so tests can observe extractions.
pub(crate) struct FakeImage {
    name: String,
    digest: Digest,
    pub(crate) manifest: OciImageManifest,
    config: serde_json::Value,
    layers: HashMap<Digest, Vec<u8>>,
    opens: Mutex<HashMap<Digest, usize>>,
    delay: Option<Duration>,
}

impl FakeImage {
    pub(crate) fn new(name: &str, layers: Vec<Vec<u8>>) -> Self {
        let config = json!({
            "architecture": "amd64",
            "os": "linux",
            "config": { "Cmd": ["/bin/sh"] }
        });
        let config_digest = Digest::sha256_of(config.to_string().as_bytes());

        let descriptors: Vec<_> = layers
            .iter()
            .map(|bytes| {
                json!({
                    "mediaType": "application/vnd.oci.image.layer.v1.tar",
                    "digest": Digest::sha256_of(bytes).to_string(),
                    "size": bytes.len()
                })
            })
            .collect();
        let manifest_json = json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config_digest.to_string(),
                "size": config.to_string().len()
            },
            "layers": descriptors,
            "annotations": { "org.opencontainers.image.ref.name": name }
        });

        Self {
            name: name.to_string(),
            digest: Digest::sha256_of(manifest_json.to_string().as_bytes()),
            manifest: serde_json::from_value(manifest_json).unwrap(),
            config,
            layers: layers
                .into_iter()
                .map(|bytes| (Digest::sha256_of(&bytes), bytes))
                .collect(),
            opens: Mutex::new(HashMap::new()),
            delay: None,
        }
    }

    /// Sleep before serving each layer, widening race windows.
    pub(crate) fn with_delay_ms(mut self, millis: u64) -> Self {
        self.delay = Some(Duration::from_millis(millis));
        self
    }

    pub(crate) fn layer_digests(&self) -> Vec<Digest> {
        self.manifest
            .layers
            .iter()
            .map(|layer| Digest::parse(&layer.digest).unwrap())
            .collect()
    }

    pub(crate) fn opens(&self, digest: &Digest) -> usize {
        self.opens.lock().unwrap().get(digest).copied().unwrap_or(0)
    }

    pub(crate) fn total_opens(&self) -> usize {
        self.opens.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl LayerSource for FakeImage {
    async fn open_layer(&self, digest: &Digest) -> Result<LayerReader> {
        *self.opens.lock().unwrap().entry(digest.clone()).or_insert(0) += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let bytes = self.layers.get(digest).cloned().ok_or_else(|| {
            LayerdbError::RegistryError {
                registry: "fake".to_string(),
                message: format!("unknown layer {}", digest),
            }
        })?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

impl ImageHandle for FakeImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn digest(&self) -> &Digest {
        &self.digest
    }

    fn manifest(&self) -> &OciImageManifest {
        &self.manifest
    }

    fn config(&self) -> &serde_json::Value {
        &self.config
    }
}
