//! # thumb-path
//!
//! Path grammar for the thumbfs overlay.
//!
//! This crate provides:
//! - Canonical, hash-sharded storage paths for named originals
//! - Decoding of thumbnail request paths (`xx/xx/xx/<stem>_<W>x<H>[@2x].<ext>`)
//! - The fixed set of 256 shard directory names
//!
//! ## Example
//!
//! ```
//! use thumb_path::{PathCodec, Variant};
//!
//! let codec = PathCodec::default();
//! assert_eq!(codec.encode("cat.jpg"), "88/c3/04/cat.jpg");
//!
//! let request = codec.decode("88/c3/04/cat_100x50@2x.jpg").unwrap();
//! assert_eq!(request.original_name, "cat.jpg");
//! assert_eq!((request.width, request.height), (100, 50));
//! assert_eq!(request.variant, Variant::Doubled);
//! ```

mod codec;
mod error;

pub use codec::{
    is_shard_name, is_thumbnail_request, shard_names, PathCodec, Redaction, ThumbnailRequest,
    Variant, DEFAULT_NAMESPACE, SHARD_COUNT,
};
pub use error::{Error, Result};
