use crate::resize::ResizeError;
use thiserror::Error;

/// Errors surfaced by the thumbfs resolver and materializer.
#[derive(Debug, Error)]
pub enum Error {
    /// No real file, derivable thumbnail, or shard directory exists at the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write was attempted through the read-only overlay.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The path resembles a thumbnail request but cannot be decoded.
    #[error("malformed thumbnail path: {0}")]
    Malformed(#[from] thumb_path::Error),

    /// The original could not be decoded, resized, or re-encoded.
    #[error("image decode failure: {0}")]
    DecodeFailure(#[from] ResizeError),

    /// The backing store failed.
    #[error("backing store I/O error: {0}")]
    BackingStore(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the caller should see this as a missing entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Malformed(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type for thumb-fs operations.
pub type Result<T> = std::result::Result<T, Error>;
