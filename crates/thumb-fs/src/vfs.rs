//! Request resolution for the thumbnail overlay.
//!
//! Every transport call lands here. Resolution layers three kinds of entries
//! into one namespace, earlier rules winning:
//!
//! 1. real entries in the backing store
//! 2. thumbnail requests whose original exists (attributes only)
//! 3. synthetic shard directories in the first three levels
//!
//! Anything else is not found.

use crate::config::ThumbFsConfig;
use crate::error::{Error, Result};
use crate::materialize::{MaterializerStats, ThumbnailMaterializer};
use crate::resize::{ImageCrateResizer, ImageResizer};
use crate::store::{
    is_missing, Attributes, BackingStore, DirEntry, EntryKind, FileHandle, LocalStore,
};
use log::{debug, trace};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use thumb_path::{is_shard_name, is_thumbnail_request, shard_names, PathCodec};

/// Shard levels below the root that are synthesized.
const SHARD_DEPTH: usize = 3;

/// Flags of an open request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    /// Plain read-only open.
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Whether the open asks to modify the file.
    pub fn wants_write(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }
}

/// Resolves attribute, listing and open requests against a backing store.
pub struct VirtualFsResolver {
    store: Arc<dyn BackingStore>,
    codec: PathCodec,
    materializer: ThumbnailMaterializer,
    created: SystemTime,
}

impl VirtualFsResolver {
    pub fn new(
        store: Arc<dyn BackingStore>,
        resizer: Arc<dyn ImageResizer>,
        config: ThumbFsConfig,
    ) -> Self {
        let materializer = ThumbnailMaterializer::new(
            store.clone(),
            resizer,
            config.codec.clone(),
            config.quality,
        )
        .with_limits(config.limits);

        Self {
            store,
            codec: config.codec,
            materializer,
            created: SystemTime::now(),
        }
    }

    /// Resolver over a local source directory with the default resizer.
    pub fn local<P: Into<PathBuf>>(source_dir: P, config: ThumbFsConfig) -> Self {
        let resizer = ImageCrateResizer::default().with_limits(config.limits);
        Self::new(
            Arc::new(LocalStore::new(source_dir)),
            Arc::new(resizer),
            config,
        )
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    pub fn stats(&self) -> MaterializerStats {
        self.materializer.stats()
    }

    /// Resolve the attributes of `path`.
    ///
    /// For a thumbnail that has not been generated yet, the original's
    /// attributes stand in for it. Its size is the original's, not the
    /// eventual thumbnail's.
    pub fn attributes(&self, path: &str) -> Result<Attributes> {
        let path = normalize(path);
        trace!("attributes({:?})", path);

        match self.store.attributes(path) {
            Ok(attr) => return Ok(attr),
            Err(e) if path.is_empty() || is_missing(&e) => {}
            Err(e) => return Err(e.into()),
        }

        if path.is_empty() {
            return Ok(self.synthetic_directory());
        }

        if is_thumbnail_request(path) {
            if let Ok(request) = self.codec.decode(path) {
                let canonical = self.codec.encode(&request.original_name);
                if let Ok(attr) = self.store.attributes(&canonical) {
                    debug!("attributes: {} stands in for {}", canonical, path);
                    return Ok(attr);
                }
            }
        }

        if self.is_synthetic_directory(path) {
            return Ok(self.synthetic_directory());
        }

        Err(Error::NotFound(path.to_string()))
    }

    /// List `path`, merging real entries with synthetic shard directories.
    ///
    /// Never fails: a path with neither real nor synthetic entries yields an
    /// empty listing. Use [`attributes`](Self::attributes) to tell an empty
    /// directory from a missing one.
    pub fn list_directory(&self, path: &str) -> Vec<DirEntry> {
        let path = normalize(path);
        trace!("list_directory({:?})", path);

        let mut entries = match self.store.read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                trace!("list_directory: no real listing for {:?}: {}", path, e);
                Vec::new()
            }
        };

        if depth(path) < SHARD_DEPTH {
            let real: HashSet<String> = entries.iter().map(|e| e.name.clone()).collect();
            entries.extend(
                shard_names()
                    .iter()
                    .filter(|name| !real.contains(*name))
                    .map(|name| DirEntry::new(name.clone(), EntryKind::Directory)),
            );
        }

        entries
    }

    /// Open `path` for reading, generating the thumbnail if needed.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn FileHandle>> {
        let path = normalize(path);
        trace!("open({:?}, {:?})", path, flags);

        if flags.wants_write() {
            return Err(Error::PermissionDenied(path.to_string()));
        }

        // Only absence lets derived content through; an unreadable real file stays in front.
        match self.store.open(path) {
            Ok(handle) => return Ok(handle),
            Err(e) if is_missing(&e) => trace!("open: no real file at {:?}", path),
            Err(e) => return Err(e.into()),
        }

        if is_thumbnail_request(path) {
            debug!("open: materializing {}", path);
            return self.materializer.materialize(path);
        }

        Err(Error::NotFound(path.to_string()))
    }

    fn is_synthetic_directory(&self, path: &str) -> bool {
        let depth = depth(path);
        if depth == 0 || depth > SHARD_DEPTH {
            return false;
        }

        let last = path.rsplit('/').next().unwrap_or(path);
        is_shard_name(last) || (depth > 1 && self.codec.redaction_substitutes().any(|s| s == last))
    }

    fn synthetic_directory(&self) -> Attributes {
        match self.store.attributes("") {
            Ok(root) => Attributes {
                kind: EntryKind::Directory,
                size: 0,
                perm: 0o755,
                nlink: 2,
                ..root
            },
            Err(_) => Attributes::directory(self.created),
        }
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Number of segments in a normalized path; the root has none.
fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('/').count()
    }
}
