//! Image pull orchestrator.
//!
//! Stores the image record first, then ensures every layer of the manifest
//! in order. A cached image record ends the pull early unless layer
//! verification is enabled.

use std::sync::Arc;

use layerdb_core::config::StoreConfig;
use layerdb_core::error::Result;
use layerdb_core::event::{EventEmitter, PullEvent};
use oci_distribution::manifest::OciImageManifest;
use oci_distribution::Reference;

use super::digest::Digest;
use super::registry::{parse_reference, RegistryAuth, RegistryClient};
use super::store::ImageStore;
use crate::cache::{CacheOutcome, LayerSource, LayerStore};

/// A resolved image: its identity, documents, and layer contents.
pub trait ImageHandle: LayerSource {
    /// Reference the image was resolved from.
    fn name(&self) -> &str;

    /// Digest of the image manifest.
    fn digest(&self) -> &Digest;

    fn manifest(&self) -> &OciImageManifest;

    fn config(&self) -> &serde_json::Value;
}

/// What a pull did.
#[derive(Debug, Clone, PartialEq)]
pub struct PullReport {
    pub digest: Digest,
    pub image: CacheOutcome,
    /// Layers visited, in manifest order. Empty when the pull stopped at a
    /// cached image record.
    pub layers: Vec<(Digest, CacheOutcome)>,
}

impl PullReport {
    /// Number of layers unpacked by this pull.
    pub fn fetched_layers(&self) -> usize {
        self.layers
            .iter()
            .filter(|(_, outcome)| !outcome.is_cached())
            .count()
    }
}

/// Pulls images into the image and layer stores.
pub struct ImagePuller {
    images: Arc<ImageStore>,
    layers: Arc<LayerStore>,
    registry: RegistryClient,
    events: EventEmitter,
    verify_layers: bool,
}

impl ImagePuller {
    pub fn new(images: Arc<ImageStore>, layers: Arc<LayerStore>, registry: RegistryClient) -> Self {
        Self {
            images,
            layers,
            registry,
            events: EventEmitter::default(),
            verify_layers: false,
        }
    }

    /// Open both stores and a registry client as described by `config`.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        config.ensure_roots()?;
        let images = Arc::new(ImageStore::new(&config.image_root)?);
        let layers = Arc::new(LayerStore::new(&config.layer_root)?);
        let registry = RegistryClient::new(RegistryAuth::from_env(), &config.insecure_registries);

        Ok(Self::new(images, layers, registry).with_verify_layers(config.verify_layers))
    }

    /// Also ensure layers when the image record is already cached.
    pub fn with_verify_layers(mut self, verify: bool) -> Self {
        self.verify_layers = verify;
        self
    }

    /// Progress events of this puller.
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Parse `reference`, resolve it against its registry and pull it.
    ///
    /// A malformed reference fails before any event is emitted.
    pub async fn pull(&self, reference: &str) -> Result<PullReport> {
        let reference = parse_reference(reference)?;
        self.pull_reference(&reference).await
    }

    /// Resolve a parsed reference against its registry and pull it.
    pub async fn pull_reference(&self, reference: &Reference) -> Result<PullReport> {
        self.events.emit(PullEvent::ImageResolving {
            reference: reference.to_string(),
        });
        let image = self.registry.resolve(reference).await?;
        self.pull_image(&image).await
    }

    /// Pull an already resolved image.
    pub async fn pull_image(&self, image: &dyn ImageHandle) -> Result<PullReport> {
        let digest = image.digest().clone();

        // Validate every layer digest before anything is written.
        let layer_digests = image
            .manifest()
            .layers
            .iter()
            .map(|layer| Digest::parse(&layer.digest))
            .collect::<Result<Vec<_>>>()?;

        let outcome = self
            .images
            .ensure_image(&digest, image.manifest(), image.config())
            .await?;

        let mut report = PullReport {
            digest: digest.clone(),
            image: outcome,
            layers: Vec::with_capacity(layer_digests.len()),
        };

        if outcome.is_cached() {
            self.events.emit(PullEvent::ImageCached {
                digest: digest.to_string(),
            });
            if !self.verify_layers {
                tracing::info!(image = %image.name(), digest = %digest, "Image already pulled");
                return Ok(report);
            }
        } else {
            self.events.emit(PullEvent::ImageStored {
                digest: digest.to_string(),
            });
        }

        for layer in layer_digests {
            self.events.emit(PullEvent::LayerStarted {
                digest: layer.to_string(),
            });

            let outcome = self.layers.ensure_layer(&layer, image).await?;
            let event = match outcome {
                CacheOutcome::AlreadyCached => PullEvent::LayerCached {
                    digest: layer.to_string(),
                },
                CacheOutcome::Fetched => PullEvent::LayerFetched {
                    digest: layer.to_string(),
                },
            };
            self.events.emit(event);
            report.layers.push((layer, outcome));
        }

        tracing::info!(
            image = %image.name(),
            digest = %digest,
            layers = report.layers.len(),
            fetched = report.fetched_layers(),
            "Image pulled"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeImage, TestArchive};
    use layerdb_core::error::LayerdbError;
    use layerdb_core::event::EventStream;
    use serde_json::Value;
    use tempfile::TempDir;

    fn puller(tmp: &TempDir) -> ImagePuller {
        let config = StoreConfig::with_root(tmp.path());
        ImagePuller::from_config(&config).unwrap()
    }

    fn layer(name: &str) -> Vec<u8> {
        TestArchive::new()
            .dir(&format!("{name}/"))
            .file(&format!("{name}/data.txt"), name.as_bytes())
            .finish()
    }

    async fn drain(mut stream: EventStream) -> Vec<&'static str> {
        let mut keys = Vec::new();
        while let Some(event) = stream.recv().await {
            keys.push(event.key());
        }
        keys
    }

    #[test]
    fn test_from_config_creates_roots() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::with_root(tmp.path());

        ImagePuller::from_config(&config).unwrap();

        assert!(config.image_root.is_dir());
        assert!(config.layer_root.is_dir());
    }

    #[tokio::test]
    async fn test_pull_stores_image_and_layers() {
        let tmp = TempDir::new().unwrap();
        let puller = puller(&tmp);
        let image = FakeImage::new("app", vec![layer("base"), layer("app")]);

        let report = puller.pull_image(&image).await.unwrap();

        assert_eq!(report.image, CacheOutcome::Fetched);
        assert_eq!(report.fetched_layers(), 2);
        assert_eq!(
            report.layers.iter().map(|(d, _)| d.clone()).collect::<Vec<_>>(),
            image.layer_digests()
        );
        let record: crate::oci::ImageRecord<OciImageManifest, Value> =
            puller.images.load(image.digest()).unwrap();
        assert_eq!(record.manifest.layers.len(), 2);
        for digest in image.layer_digests() {
            assert!(puller.layers.contains(&digest).unwrap());
        }
    }

    #[tokio::test]
    async fn test_cached_image_stops_before_layers() {
        let tmp = TempDir::new().unwrap();
        let puller = puller(&tmp);
        let image = FakeImage::new("app", vec![layer("base")]);
        puller.pull_image(&image).await.unwrap();

        // A missing layer goes unnoticed without verification.
        let digest = image.layer_digests()[0].clone();
        std::fs::remove_dir_all(puller.layers.layer_path(&digest)).unwrap();

        let report = puller.pull_image(&image).await.unwrap();

        assert_eq!(report.image, CacheOutcome::AlreadyCached);
        assert!(report.layers.is_empty());
        assert_eq!(image.total_opens(), 1);
        assert!(!puller.layers.contains(&digest).unwrap());
    }

    #[tokio::test]
    async fn test_verify_layers_repairs_missing_layer() {
        let tmp = TempDir::new().unwrap();
        let puller = puller(&tmp).with_verify_layers(true);
        let image = FakeImage::new("app", vec![layer("base"), layer("app")]);
        puller.pull_image(&image).await.unwrap();

        let missing = image.layer_digests()[1].clone();
        std::fs::remove_dir_all(puller.layers.layer_path(&missing)).unwrap();

        let report = puller.pull_image(&image).await.unwrap();

        assert_eq!(report.image, CacheOutcome::AlreadyCached);
        assert_eq!(report.layers[0].1, CacheOutcome::AlreadyCached);
        assert_eq!(report.layers[1], (missing.clone(), CacheOutcome::Fetched));
        assert_eq!(image.opens(&missing), 2);
        assert!(puller.layers.contains(&missing).unwrap());
    }

    #[tokio::test]
    async fn test_shared_layer_extracted_once_in_either_order() {
        for reverse in [false, true] {
            let tmp = TempDir::new().unwrap();
            let puller = puller(&tmp);
            let first = FakeImage::new("first", vec![layer("base"), layer("one")]);
            let second = FakeImage::new("second", vec![layer("base"), layer("two")]);
            let shared = first.layer_digests()[0].clone();

            let order: [&FakeImage; 2] = if reverse {
                [&second, &first]
            } else {
                [&first, &second]
            };
            for image in order {
                puller.pull_image(image).await.unwrap();
            }

            assert_eq!(first.opens(&shared) + second.opens(&shared), 1);
            assert_eq!(puller.layers.list().unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_bad_layer_digest_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let puller = puller(&tmp);
        let mut image = FakeImage::new("bad", vec![layer("base")]);
        image.manifest.layers[0].digest = "sha256:../../escape".to_string();

        let result = puller.pull_image(&image).await;

        assert!(matches!(result, Err(LayerdbError::DigestError(_))));
        assert!(puller.images.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_layer_failure_aborts_pull() {
        let tmp = TempDir::new().unwrap();
        let puller = puller(&tmp);
        let evil = TestArchive::new()
            .raw("../outside.txt", tar::EntryType::Regular, b"x")
            .finish();
        let image = FakeImage::new("evil", vec![evil, layer("after")]);

        let result = puller.pull_image(&image).await;

        assert!(matches!(result, Err(LayerdbError::UnsafeEntryPath { .. })));
        assert_eq!(image.opens(&image.layer_digests()[1]), 0);
        assert!(puller.layers.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pull_emits_events_in_order() {
        let tmp = TempDir::new().unwrap();
        let puller = puller(&tmp);
        let image = FakeImage::new("app", vec![layer("base")]);
        puller.pull_image(&image).await.unwrap();

        let stream = puller.events().subscribe();
        let other = FakeImage::new("other", vec![layer("base"), layer("new")]);
        puller.pull_image(&other).await.unwrap();
        puller.pull_image(&other).await.unwrap();
        drop(puller);

        use layerdb_core::event::events::*;
        assert_eq!(
            drain(stream).await,
            vec![
                IMAGE_STORED,
                LAYER_STARTED,
                LAYER_CACHED,
                LAYER_STARTED,
                LAYER_FETCHED,
                IMAGE_CACHED,
            ]
        );
    }

    #[tokio::test]
    async fn test_pull_rejects_invalid_reference() {
        let tmp = TempDir::new().unwrap();
        let puller = puller(&tmp);
        let stream = puller.events().subscribe();

        let result = puller.pull("Not A Reference!").await;
        drop(puller);

        assert!(matches!(result, Err(LayerdbError::ReferenceError(_))));
        assert!(drain(stream).await.is_empty());
    }
}
