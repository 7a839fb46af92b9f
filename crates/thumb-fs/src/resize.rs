//! Image resizing collaborator.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Format every thumbnail is encoded to, regardless of the requested extension.
pub const OUTPUT_FORMAT: ImageFormat = ImageFormat::Jpeg;

/// Default JPEG quality for generated thumbnails.
pub const DEFAULT_QUALITY: u8 = 5;

/// Largest width or height the JPEG encoder accepts.
pub const MAX_DIMENSION: u32 = 65_535;

/// Default cap on the pixel count of one thumbnail.
pub const DEFAULT_MAX_PIXELS: u64 = 25_000_000;

/// Target of a resize operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeSpec {
    pub width: u32,
    pub height: u32,
    /// Encoder quality, 1-100.
    pub quality: u8,
}

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("cannot decode source image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("cannot encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),

    #[error("invalid resize target {width}x{height} at quality {quality}")]
    InvalidSpec { width: u32, height: u32, quality: u8 },
}

/// Bounds on resize targets, checked before any pixel buffer is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeLimits {
    /// Largest accepted width or height.
    pub max_dimension: u32,
    /// Largest accepted `width * height`.
    pub max_pixels: u64,
}

impl Default for ResizeLimits {
    fn default() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl ResizeLimits {
    /// Reject zero or oversized dimensions and out-of-range quality.
    pub fn check(&self, spec: &ResizeSpec) -> Result<(), ResizeError> {
        let pixels = u64::from(spec.width) * u64::from(spec.height);
        let in_bounds = spec.width > 0
            && spec.height > 0
            && spec.width <= self.max_dimension
            && spec.height <= self.max_dimension
            && pixels <= self.max_pixels;

        if !in_bounds || !(1..=100).contains(&spec.quality) {
            return Err(ResizeError::InvalidSpec {
                width: spec.width,
                height: spec.height,
                quality: spec.quality,
            });
        }
        Ok(())
    }
}

/// Decodes, resizes and re-encodes raw image bytes.
pub trait ImageResizer: Send + Sync {
    fn resize(&self, source: &[u8], spec: &ResizeSpec) -> Result<Vec<u8>, ResizeError>;
}

/// [`ImageResizer`] backed by the `image` crate.
///
/// Resizes to the exact target dimensions without preserving aspect ratio.
#[derive(Debug, Clone, Copy)]
pub struct ImageCrateResizer {
    filter: FilterType,
    limits: ResizeLimits,
}

impl Default for ImageCrateResizer {
    fn default() -> Self {
        Self::new(FilterType::Triangle)
    }
}

impl ImageCrateResizer {
    pub fn new(filter: FilterType) -> Self {
        Self {
            filter,
            limits: ResizeLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ResizeLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl ImageResizer for ImageCrateResizer {
    fn resize(&self, source: &[u8], spec: &ResizeSpec) -> Result<Vec<u8>, ResizeError> {
        self.limits.check(spec)?;

        let decoded = image::load_from_memory(source).map_err(ResizeError::Decode)?;
        let resized = decoded
            .resize_exact(spec.width, spec.height, self.filter)
            .to_rgb8();
        drop(decoded);

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, spec.quality)
            .write_image(
                resized.as_raw(),
                resized.width(),
                resized.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(ResizeError::Encode)?;

        Ok(encoded)
    }
}
