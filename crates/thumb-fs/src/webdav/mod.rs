//! WebDAV transport for the thumbnail overlay.
//!
//! This module serves a [`VirtualFsResolver`](crate::VirtualFsResolver) over
//! WebDAV, so the overlay can be mounted from Finder, Explorer, `davfs2`, or
//! read over plain HTTP without a kernel module.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use thumb_fs::webdav::serve;
//! use thumb_fs::{ImageCrateResizer, LocalStore, ThumbFsConfig, VirtualFsResolver};
//!
//! let resolver = VirtualFsResolver::new(
//!     Arc::new(LocalStore::new("/srv/media")),
//!     Arc::new(ImageCrateResizer::default()),
//!     ThumbFsConfig::default(),
//! );
//!
//! // Start WebDAV server on port 4918
//! serve(Arc::new(resolver), 4918).await?;
//! ```

mod filesystem;
mod server;

pub use filesystem::ThumbDavFs;
pub use server::{serve, serve_background, ThumbWebDavServer};
