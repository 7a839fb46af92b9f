use thiserror::Error;

/// Errors produced while decoding or building thumbnail paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The path does not follow the thumbnail grammar.
    #[error("path does not match the thumbnail grammar")]
    NoMatch,

    /// A width or height is zero or does not fit in a `u32`.
    #[error("invalid thumbnail dimension: {0}")]
    InvalidDimension(String),
}

/// Result type for thumb-path operations.
pub type Result<T> = std::result::Result<T, Error>;
