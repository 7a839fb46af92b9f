//! FUSE adapter for the thumbnail overlay.
//!
//! This module mounts a [`VirtualFsResolver`](crate::VirtualFsResolver) as a
//! kernel filesystem so that any program can open thumbnail paths directly.
//!
//! # Features
//!
//! - **Pass-through**: real files in the source directory are served unchanged
//! - **Lazy generation**: opening a missing thumbnail path generates it once
//!   and caches it in the source directory
//! - **Read-only**: any open with write intent fails with `EPERM`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use thumb_fs::fuse::mount;
//! use thumb_fs::{ImageCrateResizer, LocalStore, ThumbFsConfig, VirtualFsResolver};
//!
//! let resolver = VirtualFsResolver::new(
//!     Arc::new(LocalStore::new("/srv/media")),
//!     Arc::new(ImageCrateResizer::default()),
//!     ThumbFsConfig::default(),
//! );
//! mount(Arc::new(resolver), "/mnt/thumbs", true)?;
//! ```

mod adapter;

pub use adapter::*;
