//! layerdb core - shared types for the image and layer stores.
//!
//! This crate provides the error taxonomy, store configuration and
//! pull progress events used across the layerdb workspace.

pub mod config;
pub mod error;
pub mod event;

// Re-export commonly used types
pub use config::{LogLevel, StoreConfig};
pub use error::{LayerdbError, Result};
pub use event::{EventEmitter, PullEvent};

/// layerdb version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
