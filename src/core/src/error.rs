use thiserror::Error;

/// layerdb error types
#[derive(Error, Debug)]
pub enum LayerdbError {
    /// Malformed image reference
    #[error("Invalid image reference: {0}")]
    ReferenceError(String),

    /// Malformed content digest
    #[error("Invalid digest: {0}")]
    DigestError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Image store I/O or serialization failure
    #[error("Image store error: {digest} - {message}")]
    ImageStoreError { digest: String, message: String },

    /// Layer store I/O failure
    #[error("Layer store error: {digest} - {message}")]
    LayerStoreError { digest: String, message: String },

    /// Malformed archive, truncated body or failed entry write
    #[error("Archive error: {entry} - {message}")]
    ArchiveError { entry: String, message: String },

    /// Archive entry resolving outside the destination directory
    #[error("Unsafe archive entry path: {entry}")]
    UnsafeEntryPath { entry: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for LayerdbError {
    fn from(err: serde_json::Error) -> Self {
        LayerdbError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for LayerdbError {
    fn from(err: serde_yaml::Error) -> Self {
        LayerdbError::SerializationError(err.to_string())
    }
}

/// Result type alias for layerdb operations
pub type Result<T> = std::result::Result<T, LayerdbError>;
