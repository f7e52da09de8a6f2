//! layerdb store - content-addressed image and layer stores.
//!
//! Pulls OCI images from registries into an image metadata store and a
//! shared store of unpacked layers.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod oci;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types
pub use cache::{CacheOutcome, LayerReader, LayerSource, LayerStore};
pub use oci::{Digest, ImageHandle, ImagePuller, ImageRecord, ImageStore, PullReport};
pub use oci::{RegistryAuth, RegistryClient, RemoteImage};

/// Re-exported so handles can name manifest types without a direct dependency.
pub use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
