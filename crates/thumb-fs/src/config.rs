use crate::error::{Error, Result};
use crate::resize::{ResizeLimits, DEFAULT_QUALITY, MAX_DIMENSION};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thumb_path::PathCodec;

/// Configuration for a thumbfs overlay.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// quality = 40
///
/// [limits]
/// max_pixels = 1000000
///
/// [codec]
/// namespace = "media/image/"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbFsConfig {
    /// Canonical path encoding.
    pub codec: PathCodec,
    /// JPEG quality of generated thumbnails (1-100).
    pub quality: u8,
    /// Bounds on requested thumbnail dimensions.
    pub limits: ResizeLimits,
    /// Whether the FUSE mount is read-only at the kernel level.
    ///
    /// Off by default: write-intent opens then reach the overlay and fail
    /// with `EPERM`. When on, the kernel answers them with `EROFS` first.
    pub read_only_mount: bool,
}

impl Default for ThumbFsConfig {
    fn default() -> Self {
        Self {
            codec: PathCodec::default(),
            quality: DEFAULT_QUALITY,
            limits: ResizeLimits::default(),
            read_only_mount: false,
        }
    }
}

impl ThumbFsConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ThumbFsConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(Error::Config(format!(
                "quality must be between 1 and 100, got {}",
                self.quality
            )));
        }
        if self.limits.max_dimension == 0 || self.limits.max_dimension > MAX_DIMENSION {
            return Err(Error::Config(format!(
                "limits.max_dimension must be between 1 and {}, got {}",
                MAX_DIMENSION, self.limits.max_dimension
            )));
        }
        if self.limits.max_pixels == 0 {
            return Err(Error::Config("limits.max_pixels must not be zero".to_string()));
        }
        if self.codec.redactions.iter().any(|r| r.pattern.is_empty()) {
            return Err(Error::Config("redaction pattern must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thumb_path::DEFAULT_NAMESPACE;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ThumbFsConfig::from_toml_str("").unwrap();
        assert_eq!(config, ThumbFsConfig::default());
        assert_eq!(config.quality, 5);
        assert_eq!(config.codec.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.limits, ResizeLimits::default());
        assert!(!config.read_only_mount);
    }

    #[test]
    fn test_partial_document() {
        let config = ThumbFsConfig::from_toml_str(
            r#"
quality = 40

[codec]
namespace = "media/avatar/"
"#,
        )
        .unwrap();

        assert_eq!(config.quality, 40);
        assert_eq!(config.codec.namespace, "media/avatar/");
        assert_eq!(config.codec.redactions, PathCodec::default().redactions);
    }

    #[test]
    fn test_rejects_out_of_range_quality() {
        let err = ThumbFsConfig::from_toml_str("quality = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = ThumbFsConfig::default().with_quality(101).validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_unparseable_document() {
        let err = ThumbFsConfig::from_toml_str("quality = \"high\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ThumbFsConfig::load("/nonexistent/thumbfs.toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_limits_section() {
        let config = ThumbFsConfig::from_toml_str(
            r#"
[limits]
max_pixels = 1000000
"#,
        )
        .unwrap();
        assert_eq!(config.limits.max_pixels, 1_000_000);
        assert_eq!(config.limits.max_dimension, MAX_DIMENSION);

        let err = ThumbFsConfig::from_toml_str("[limits]\nmax_dimension = 70000").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = ThumbFsConfig::from_toml_str("[limits]\nmax_pixels = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
