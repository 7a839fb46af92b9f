//! # thumb-fs
//!
//! Virtual filesystem overlay that exposes lazily generated image thumbnails
//! beneath a real directory of originals.
//!
//! This crate provides:
//! - Request resolution layering real files, synthetic shard directories and
//!   not-yet-generated thumbnails into one namespace
//! - On-demand thumbnail materialization, generated once per path and cached
//!   in the backing store
//! - A local-directory backing store and an `image`-crate resizer
//! - FUSE filesystem support (with `fuse` feature)
//! - WebDAV server support (with `webdav` feature)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use thumb_fs::{ImageCrateResizer, LocalStore, OpenFlags, ThumbFsConfig, VirtualFsResolver};
//!
//! let resolver = VirtualFsResolver::new(
//!     Arc::new(LocalStore::new("/srv/media")),
//!     Arc::new(ImageCrateResizer::default()),
//!     ThumbFsConfig::default(),
//! );
//!
//! // 88/c3/04/cat.jpg exists in /srv/media; the thumbnail is generated on open.
//! let handle = resolver.open("88/c3/04/cat_100x50.jpg", OpenFlags::read_only())?;
//! let jpeg = handle.read_at(0, handle.size() as usize)?;
//! ```
//!
//! ## FUSE Support
//!
//! ```ignore
//! use thumb_fs::fuse::mount;
//!
//! mount(Arc::new(resolver), "/mnt/thumbs", true)?;
//! ```
//!
//! ## WebDAV Support
//!
//! ```ignore
//! use thumb_fs::webdav::serve;
//!
//! serve(Arc::new(resolver), 4918).await?;
//! ```

mod config;
mod error;
mod materialize;
pub mod resize;
pub mod store;
mod vfs;

#[cfg(feature = "webdav")]
pub mod webdav;

#[cfg(feature = "fuse")]
pub mod fuse;

pub use config::ThumbFsConfig;
pub use error::{Error, Result};
pub use materialize::{MaterializerStats, ThumbnailMaterializer};
pub use resize::{ImageCrateResizer, ImageResizer, ResizeError, ResizeLimits, ResizeSpec};
pub use store::{Attributes, BackingStore, DirEntry, EntryKind, FileHandle, LocalStore, StagedFile};
pub use vfs::{OpenFlags, VirtualFsResolver};

// Re-export thumb-path types for convenience
pub use thumb_path::{PathCodec, ThumbnailRequest, Variant};
