//! Backing store abstraction.
//!
//! The backing store is the real, durable tree holding originals and
//! materialized thumbnails. Paths are `/`-separated and relative to the store
//! root; the empty string names the root itself.

mod local;

pub use local::LocalStore;

use std::io;
use std::time::SystemTime;

/// Kind of entry found in the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Attributes of a backing-store entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub kind: EntryKind,
    pub size: u64,
    /// Permission bits (`0o7777` mask).
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Attributes {
    /// Attributes for a directory that exists only in the overlay.
    pub fn directory(time: SystemTime) -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            perm: 0o755,
            nlink: 2,
            uid: 0,
            gid: 0,
            atime: time,
            mtime: time,
            ctime: time,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// A single directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// An open, readable file.
pub trait FileHandle: Send + Sync {
    /// Size of the file when it was opened.
    fn size(&self) -> u64;

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only at end of file.
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

/// A file being written that is invisible until persisted.
pub trait StagedFile: Send {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Atomically publish the staged bytes at the destination path,
    /// replacing any existing file.
    fn persist(self: Box<Self>) -> io::Result<()>;
}

/// The real file tree the overlay sits on.
pub trait BackingStore: Send + Sync {
    fn attributes(&self, path: &str) -> io::Result<Attributes>;

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>>;

    /// Open a file for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn FileHandle>>;

    /// Stage a new file that will be created (or replaced) at `path`.
    fn create(&self, path: &str) -> io::Result<Box<dyn StagedFile>>;

    /// Create a single directory. Fails with `AlreadyExists` if it exists.
    fn make_dir(&self, path: &str) -> io::Result<()>;
}

/// Whether a store error means nothing exists at the path.
pub fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Read a handle's full content as reported by `expected_size`.
pub fn read_to_end(handle: &dyn FileHandle, expected_size: u64) -> io::Result<Vec<u8>> {
    let len = usize::try_from(expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file too large to buffer"))?;
    handle.read_at(0, len)
}
