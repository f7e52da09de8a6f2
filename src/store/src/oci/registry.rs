//! OCI registry adapter.
//!
//! Resolves image references with the `oci-distribution` crate and serves
//! layer blobs as uncompressed tar streams.

use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use layerdb_core::error::{LayerdbError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use tokio::io::AsyncWriteExt;

use super::digest::Digest;
use super::pull::ImageHandle;
use crate::cache::{LayerReader, LayerSource};

const OCI_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
const OCI_LAYER_NONDIST_TAR: &str = "application/vnd.oci.image.layer.nondistributable.v1.tar";
const OCI_LAYER_NONDIST_GZIP: &str =
    "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";
const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
const DOCKER_LAYER_TAR: &str = "application/vnd.docker.image.rootfs.diff.tar";

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Compression of a layer blob, derived from its media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerCompression {
    None,
    Gzip,
}

impl LayerCompression {
    /// Map a layer media type, or `None` if it is not a supported tar layer.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            OCI_LAYER_TAR | OCI_LAYER_NONDIST_TAR | DOCKER_LAYER_TAR => Some(Self::None),
            OCI_LAYER_GZIP | OCI_LAYER_NONDIST_GZIP | DOCKER_LAYER_GZIP => Some(Self::Gzip),
            _ => None,
        }
    }

    fn wrap(self, blob: std::fs::File) -> LayerReader {
        match self {
            Self::None => Box::new(blob),
            Self::Gzip => Box::new(GzDecoder::new(blob)),
        }
    }
}

/// Resolves image references against remote registries.
pub struct RegistryClient {
    client: Arc<Client>,
    auth: RegistryAuth,
}

impl RegistryClient {
    /// Create a client using HTTPS for every registry except `insecure`.
    pub fn new(auth: RegistryAuth, insecure: &[String]) -> Self {
        let protocol = if insecure.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure.to_vec())
        };
        let config = ClientConfig {
            protocol,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };

        Self {
            client: Arc::new(Client::new(config)),
            auth,
        }
    }

    /// Fetch the manifest, config and digest of `reference`.
    pub async fn resolve(&self, reference: &Reference) -> Result<RemoteImage> {
        let registry = reference.registry().to_string();
        let auth = self.auth.to_oci_auth();

        tracing::info!(reference = %reference, "Resolving image");

        let (manifest, digest, config) = self
            .client
            .pull_manifest_and_config(reference, &auth)
            .await
            .map_err(|e| registry_error(&registry, format!("Failed to pull manifest: {}", e)))?;

        let digest = Digest::parse(&digest).map_err(|e| {
            registry_error(&registry, format!("Registry returned bad digest: {}", e))
        })?;
        let config = serde_json::from_str(&config)
            .map_err(|e| registry_error(&registry, format!("Failed to parse config: {}", e)))?;

        tracing::debug!(
            reference = %reference,
            digest = %digest,
            layers = manifest.layers.len(),
            "Image resolved"
        );

        Ok(RemoteImage {
            client: self.client.clone(),
            reference: reference.clone(),
            name: reference.to_string(),
            digest,
            manifest,
            config,
        })
    }
}

/// An image resolved against a registry.
pub struct RemoteImage {
    client: Arc<Client>,
    reference: Reference,
    name: String,
    digest: Digest,
    manifest: OciImageManifest,
    config: serde_json::Value,
}

impl RemoteImage {
    fn registry(&self) -> &str {
        self.reference.registry()
    }

    fn descriptor(&self, digest: &Digest) -> Result<&OciDescriptor> {
        let wanted = digest.to_string();
        self.manifest
            .layers
            .iter()
            .find(|layer| layer.digest == wanted)
            .ok_or_else(|| {
                registry_error(
                    self.registry(),
                    format!("Layer {} is not part of image {}", digest, self.digest),
                )
            })
    }
}

#[async_trait]
impl LayerSource for RemoteImage {
    async fn open_layer(&self, digest: &Digest) -> Result<LayerReader> {
        let descriptor = self.descriptor(digest)?;
        let compression = LayerCompression::from_media_type(&descriptor.media_type)
            .ok_or_else(|| {
                registry_error(
                    self.registry(),
                    format!("Unsupported layer media type: {}", descriptor.media_type),
                )
            })?;

        tracing::debug!(digest = %digest, size = descriptor.size, "Downloading layer blob");

        let spool = tempfile::tempfile()?;
        let mut blob = tokio::fs::File::from_std(spool);
        self.client
            .pull_blob(&self.reference, descriptor, &mut blob)
            .await
            .map_err(|e| {
                registry_error(
                    self.registry(),
                    format!("Failed to pull layer {}: {}", digest, e),
                )
            })?;
        blob.flush().await?;
        let mut blob = blob.into_std().await;

        let expected = digest.clone();
        let (verified, blob) = tokio::task::spawn_blocking(move || {
            blob.seek(SeekFrom::Start(0))?;
            let verified = expected.verify(&mut blob)?;
            blob.seek(SeekFrom::Start(0))?;
            Ok::<_, std::io::Error>((verified, blob))
        })
        .await
        .map_err(|e| LayerdbError::Other(format!("Digest task failed: {}", e)))??;

        if verified {
            Ok(compression.wrap(blob))
        } else {
            Err(registry_error(
                self.registry(),
                format!("Layer blob does not match digest {}", digest),
            ))
        }
    }
}

impl ImageHandle for RemoteImage {
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

/// Parse an image reference such as `alpine`, `ghcr.io/org/app:1.0` or
/// `name@sha256:...`.
pub fn parse_reference(reference: &str) -> Result<Reference> {
    reference.parse::<Reference>().map_err(|e| {
        LayerdbError::ReferenceError(format!("Invalid image reference '{}': {}", reference, e))
    })
}

/// Platform resolver that always selects linux images matching the host architecture.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}

fn registry_error(registry: &str, message: impl Into<String>) -> LayerdbError {
    LayerdbError::RegistryError {
        registry: registry.to_string(),
        message: message.into(),
    }
}
