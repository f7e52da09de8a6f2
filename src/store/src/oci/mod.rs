//! OCI image support for layerdb.
//!
//! Images are stored in two content-addressed trees:
//!
//! ```text
//! <root>/
//! ├── imagedb/
//! │   └── <image digest hex>/
//! │       ├── manifest.json    (indented image manifest)
//! │       └── config.json      (indented image config)
//! └── layerdb/
//!     └── <layer digest hex>/  (unpacked layer tree, shared by images)
//! ```

pub mod digest;
pub mod layers;
mod pull;
pub mod registry;
pub mod store;

pub use digest::{Digest, DigestAlgorithm};
pub use layers::{unpack, EntryKind, UnpackSummary};
pub use pull::{ImageHandle, ImagePuller, PullReport};
pub use registry::{parse_reference, LayerCompression, RegistryAuth, RegistryClient, RemoteImage};
pub use store::{ImageRecord, ImageStore, CONFIG_FILE, MANIFEST_FILE};
