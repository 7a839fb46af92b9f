//! Lazy thumbnail generation.
//!
//! On a cache miss the materializer fetches the original named by a thumbnail
//! request, resizes it, and persists the result at the exact request path in
//! the backing store. From then on the persisted file is served directly.
//!
//! # Concurrency
//!
//! ```text
//! open A ─┐                        ┌─► generate + persist ─► open result
//! open B ─┼─► in-flight slot(path) ┤
//! open C ─┘                        └─► wait ─► open persisted result
//! ```
//!
//! Requests for the same path are serialized by a per-path slot; whoever
//! holds the slot first generates, later holders find the persisted file and
//! open it. Writes go through a staged file that is published by rename, so a
//! reader going straight to the backing store never sees a partial thumbnail.

use crate::error::{Error, Result};
use crate::resize::{ImageResizer, ResizeLimits, ResizeSpec};
use crate::store::{is_missing, read_to_end, BackingStore, FileHandle};
use dashmap::DashMap;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thumb_path::{PathCodec, ThumbnailRequest, Variant};

/// Counters describing materializer activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaterializerStats {
    /// Thumbnails generated and persisted.
    pub generated: u64,
    /// Requests that found a thumbnail persisted by a concurrent request.
    pub coalesced: u64,
    /// Requests that failed.
    pub failed: u64,
}

/// Generates and persists thumbnails on first access.
pub struct ThumbnailMaterializer {
    store: Arc<dyn BackingStore>,
    resizer: Arc<dyn ImageResizer>,
    codec: PathCodec,
    quality: u8,
    limits: ResizeLimits,
    in_flight: InFlight,
    generated: AtomicU64,
    coalesced: AtomicU64,
    failed: AtomicU64,
}

impl ThumbnailMaterializer {
    pub fn new(
        store: Arc<dyn BackingStore>,
        resizer: Arc<dyn ImageResizer>,
        codec: PathCodec,
        quality: u8,
    ) -> Self {
        Self {
            store,
            resizer,
            codec,
            quality,
            limits: ResizeLimits::default(),
            in_flight: InFlight::default(),
            generated: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn with_limits(mut self, limits: ResizeLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Generate the thumbnail at `thumbnail_path` and return a handle to it.
    ///
    /// If another request persisted the same thumbnail while this one waited,
    /// the persisted file is opened instead.
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] if the path is not a thumbnail request
    /// - [`Error::NotFound`] if the original does not exist
    /// - [`Error::DecodeFailure`] if the original cannot be resized or the
    ///   requested size exceeds the configured limits
    /// - [`Error::BackingStore`] if an existing file at the path cannot be
    ///   opened, or creating, writing or reopening the thumbnail fails
    pub fn materialize(&self, thumbnail_path: &str) -> Result<Box<dyn FileHandle>> {
        let request = self.codec.decode(thumbnail_path)?;

        self.in_flight.run_exclusive(thumbnail_path, || {
            if let Some(handle) = self.open_persisted(thumbnail_path)? {
                debug!("materialize: {} already persisted", thumbnail_path);
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                return Ok(handle);
            }

            match self.generate(thumbnail_path, &request) {
                Ok(handle) => {
                    self.generated.fetch_add(1, Ordering::Relaxed);
                    Ok(handle)
                }
                Err(e) => {
                    warn!("materialize: {} failed: {}", thumbnail_path, e);
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    Err(e)
                }
            }
        })
    }

    pub fn stats(&self) -> MaterializerStats {
        MaterializerStats {
            generated: self.generated.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Open a file already present at `path`. A file that exists but cannot
    /// be opened is an error, never a reason to generate over it.
    fn open_persisted(&self, path: &str) -> Result<Option<Box<dyn FileHandle>>> {
        match self.store.attributes(path) {
            Ok(attr) if attr.is_file() => Ok(Some(self.store.open(path)?)),
            Ok(_) => Ok(None),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn generate(&self, path: &str, request: &ThumbnailRequest) -> Result<Box<dyn FileHandle>> {
        let started = Instant::now();
        let canonical = self.codec.encode(&request.original_name);

        let attr = self
            .store
            .attributes(&canonical)
            .map_err(|e| original_error(e, &canonical))?;
        if !attr.is_file() {
            return Err(Error::NotFound(canonical));
        }

        let original = self
            .store
            .open(&canonical)
            .map_err(|e| original_error(e, &canonical))?;
        let source = read_to_end(original.as_ref(), attr.size)?;
        drop(original);
        trace!("generate: read {} bytes from {}", source.len(), canonical);

        if request.variant == Variant::Doubled {
            debug!(
                "generate: {} requests @2x; rendering at {}x{}",
                path, request.width, request.height
            );
        }

        let spec = ResizeSpec {
            width: request.width,
            height: request.height,
            quality: self.quality,
        };
        self.limits.check(&spec)?;
        let encoded = self.resizer.resize(&source, &spec)?;
        drop(source);

        self.ensure_parent_dirs(path)?;

        let mut staged = self.store.create(path)?;
        staged.write_at(0, &encoded)?;
        staged.flush()?;
        staged.persist()?;

        info!(
            "Generated {} from {} ({} bytes, {:?})",
            path,
            canonical,
            encoded.len(),
            started.elapsed()
        );

        Ok(self.store.open(path)?)
    }

    /// Create every missing directory above `path`, shallowest first.
    fn ensure_parent_dirs(&self, path: &str) -> Result<()> {
        let segments: Vec<&str> = path.split('/').collect();

        for depth in 1..segments.len() {
            let dir = segments[..depth].join("/");
            if self.store.attributes(&dir).is_ok() {
                continue;
            }

            match self.store.make_dir(&dir) {
                Ok(()) => debug!("Created directory {}", dir),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

fn original_error(err: io::Error, canonical: &str) -> Error {
    if err.kind() == io::ErrorKind::NotFound {
        Error::NotFound(canonical.to_string())
    } else {
        Error::BackingStore(err)
    }
}

/// Per-path mutual exclusion for in-flight materializations.
#[derive(Default)]
struct InFlight {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl InFlight {
    fn run_exclusive<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = slot.lock();
        let result = f();
        self.slots
            .remove_if(key, |_, current| Arc::ptr_eq(current, &slot));
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resize::ResizeError;
    use crate::store::{Attributes, DirEntry, LocalStore, StagedFile};
    use std::fs;
    use std::sync::Barrier;
    use tempfile::TempDir;

    /// Resizer that returns a fixed payload and counts calls.
    #[derive(Default)]
    struct FixedResizer {
        calls: AtomicU64,
    }

    impl ImageResizer for FixedResizer {
        fn resize(&self, source: &[u8], spec: &ResizeSpec) -> std::result::Result<Vec<u8>, ResizeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}x{}:{}", spec.width, spec.height, source.len()).into_bytes())
        }
    }

    fn setup(originals: &[&str]) -> (TempDir, Arc<FixedResizer>, ThumbnailMaterializer) {
        let dir = TempDir::new().unwrap();
        let codec = PathCodec::default();
        for name in originals {
            let full = dir.path().join(codec.encode(name));
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, b"original").unwrap();
        }

        let resizer = Arc::new(FixedResizer::default());
        let materializer = ThumbnailMaterializer::new(
            Arc::new(LocalStore::new(dir.path())),
            resizer.clone(),
            codec,
            5,
        );
        (dir, resizer, materializer)
    }

    #[test]
    fn test_generates_and_persists() {
        let (dir, resizer, materializer) = setup(&["cat.jpg"]);

        let handle = materializer.materialize("88/c3/04/cat_100x50.jpg").unwrap();

        assert_eq!(handle.read_at(0, 64).unwrap(), b"100x50:8");
        assert_eq!(
            fs::read(dir.path().join("88/c3/04/cat_100x50.jpg")).unwrap(),
            b"100x50:8"
        );
        assert_eq!(resizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(materializer.stats().generated, 1);
        assert_eq!(materializer.in_flight.len(), 0);
    }

    #[test]
    fn test_creates_missing_directories() {
        let (dir, _resizer, materializer) = setup(&["cat.jpg"]);

        // Thumbnail requested under a different shard prefix than the original.
        materializer.materialize("aa/bb/cc/cat_10x10.jpg").unwrap();

        assert!(dir.path().join("aa/bb/cc").is_dir());
        assert!(dir.path().join("aa/bb/cc/cat_10x10.jpg").is_file());
    }

    #[test]
    fn test_missing_original() {
        let (dir, resizer, materializer) = setup(&[]);

        let err = materializer.materialize("88/c3/04/cat_100x50.jpg").err().unwrap();

        assert!(matches!(err, Error::NotFound(ref p) if p == "88/c3/04/cat.jpg"));
        assert_eq!(resizer.calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("88").exists());
        assert_eq!(materializer.stats().failed, 1);
    }

    #[test]
    fn test_malformed_path() {
        let (_dir, _resizer, materializer) = setup(&["cat.jpg"]);

        let err = materializer.materialize("88/c3/04/cat.jpg").err().unwrap();
        assert!(matches!(err, Error::Malformed(thumb_path::Error::NoMatch)));

        let err = materializer.materialize("88/c3/04/cat_0x5.jpg").err().unwrap();
        assert!(matches!(
            err,
            Error::Malformed(thumb_path::Error::InvalidDimension(_))
        ));
    }

    #[test]
    fn test_concurrent_requests_generate_once() {
        let (dir, resizer, materializer) = setup(&["cat.jpg"]);
        let barrier = Barrier::new(8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    let handle = materializer.materialize("88/c3/04/cat_32x32.jpg").unwrap();
                    assert_eq!(handle.read_at(0, 64).unwrap(), b"32x32:8");
                });
            }
        });

        assert_eq!(resizer.calls.load(Ordering::SeqCst), 1);
        let stats = materializer.stats();
        assert_eq!(stats.generated, 1);
        assert_eq!(stats.coalesced, 7);
        assert_eq!(materializer.in_flight.len(), 0);

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("88/c3/04"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers.len(), 2, "{:?}", leftovers);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let (dir, resizer, materializer) = setup(&[]);

        assert!(materializer.materialize("88/c3/04/cat_8x8.jpg").is_err());

        let codec = PathCodec::default();
        let full = dir.path().join(codec.encode("cat.jpg"));
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, b"original").unwrap();

        assert!(materializer.materialize("88/c3/04/cat_8x8.jpg").is_ok());
        assert_eq!(resizer.calls.load(Ordering::SeqCst), 1);
    }

    /// Local store that refuses to open one path.
    struct LockedStore {
        inner: LocalStore,
        locked: &'static str,
    }

    impl BackingStore for LockedStore {
        fn attributes(&self, path: &str) -> io::Result<Attributes> {
            self.inner.attributes(path)
        }

        fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
            self.inner.read_dir(path)
        }

        fn open(&self, path: &str) -> io::Result<Box<dyn FileHandle>> {
            if path == self.locked {
                return Err(io::ErrorKind::PermissionDenied.into());
            }
            self.inner.open(path)
        }

        fn create(&self, path: &str) -> io::Result<Box<dyn StagedFile>> {
            self.inner.create(path)
        }

        fn make_dir(&self, path: &str) -> io::Result<()> {
            self.inner.make_dir(path)
        }
    }

    #[test]
    fn test_existing_unopenable_file_is_kept() {
        let (dir, resizer, _) = setup(&["cat.jpg"]);
        fs::write(dir.path().join("88/c3/04/cat_10x10.jpg"), b"kept").unwrap();

        let materializer = ThumbnailMaterializer::new(
            Arc::new(LockedStore {
                inner: LocalStore::new(dir.path()),
                locked: "88/c3/04/cat_10x10.jpg",
            }),
            resizer.clone(),
            PathCodec::default(),
            5,
        );

        let err = materializer.materialize("88/c3/04/cat_10x10.jpg").err().unwrap();
        assert!(matches!(err, Error::BackingStore(ref e) if e.kind() == io::ErrorKind::PermissionDenied));
        assert_eq!(resizer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fs::read(dir.path().join("88/c3/04/cat_10x10.jpg")).unwrap(), b"kept");
    }

    #[test]
    fn test_limits_checked_before_resizing() {
        let (_dir, resizer, materializer) = setup(&["cat.jpg"]);
        let materializer = materializer.with_limits(ResizeLimits {
            max_dimension: 100,
            max_pixels: 1_000,
        });

        let err = materializer.materialize("88/c3/04/cat_101x1.jpg").err().unwrap();
        assert!(matches!(err, Error::DecodeFailure(ResizeError::InvalidSpec { .. })));
        let err = materializer.materialize("88/c3/04/cat_50x50.jpg").err().unwrap();
        assert!(matches!(err, Error::DecodeFailure(_)));
        assert!(materializer.materialize("88/c3/04/cat_10x10.jpg").is_ok());
        assert_eq!(resizer.calls.load(Ordering::SeqCst), 1);
    }
}
