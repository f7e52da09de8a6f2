use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LayerdbError, Result};

/// Directory name of the image store under a store root.
pub const IMAGE_STORE_DIR: &str = "imagedb";

/// Directory name of the layer store under a store root.
pub const LAYER_STORE_DIR: &str = "layerdb";

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the image store (one directory per image digest)
    pub image_root: PathBuf,

    /// Root of the layer store (one directory per layer digest)
    pub layer_root: PathBuf,

    /// Re-check every layer of an image that is already cached
    pub verify_layers: bool,

    /// Registries reached over plain HTTP instead of HTTPS
    pub insecure_registries: Vec<String>,

    /// Log level used when RUST_LOG is not set
    pub log_level: LogLevel,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_root(".")
    }
}

impl StoreConfig {
    /// Derive both store roots from a single directory.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            image_root: root.join(IMAGE_STORE_DIR),
            layer_root: root.join(LAYER_STORE_DIR),
            verify_layers: false,
            insecure_registries: Vec::new(),
            log_level: LogLevel::Warn,
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// Fields missing from the file keep their defaults. Missing store
    /// roots are derived from `default_root`.
    pub fn from_file(path: &Path, default_root: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LayerdbError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: StoreConfigFile = serde_yaml::from_str(&content).map_err(|e| {
            LayerdbError::ConfigError(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(file.into_config(default_root.as_ref()))
    }

    /// Create both store roots if they do not exist yet.
    pub fn ensure_roots(&self) -> Result<()> {
        for root in [&self.image_root, &self.layer_root] {
            std::fs::create_dir_all(root).map_err(|e| {
                LayerdbError::ConfigError(format!(
                    "Failed to create store directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

/// On-disk form of [`StoreConfig`]; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoreConfigFile {
    image_root: Option<PathBuf>,
    layer_root: Option<PathBuf>,
    verify_layers: Option<bool>,
    insecure_registries: Option<Vec<String>>,
    log_level: Option<LogLevel>,
}

impl StoreConfigFile {
    fn into_config(self, default_root: &Path) -> StoreConfig {
        let defaults = StoreConfig::with_root(default_root);
        StoreConfig {
            image_root: self.image_root.unwrap_or(defaults.image_root),
            layer_root: self.layer_root.unwrap_or(defaults.layer_root),
            verify_layers: self.verify_layers.unwrap_or(defaults.verify_layers),
            insecure_registries: self
                .insecure_registries
                .unwrap_or(defaults.insecure_registries),
            log_level: self.log_level.unwrap_or(defaults.log_level),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive for `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
