use super::{Attributes, BackingStore, DirEntry, EntryKind, FileHandle, StagedFile};
use log::trace;
use std::fs::{self, File, Permissions};
use std::io;
use std::os::unix::fs::{FileExt, MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::NamedTempFile;

/// Prefix of staging files written next to their destination.
const STAGING_PREFIX: &str = ".tmp.thumb-";

/// Mode given to persisted files.
const PERSISTED_MODE: u32 = 0o644;

/// Backing store over a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(self.root.clone());
        }

        let rel = Path::new(trimmed);
        for component in rel.components() {
            match component {
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("invalid relative path: {}", path),
                    ));
                }
                _ => {}
            }
        }

        Ok(self.root.join(rel))
    }
}

impl BackingStore for LocalStore {
    fn attributes(&self, path: &str) -> io::Result<Attributes> {
        let full = self.resolve(path)?;
        let metadata = fs::metadata(&full)?;
        Ok(metadata_to_attributes(&metadata))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let full = self.resolve(path)?;
        let mut entries = Vec::new();

        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(STAGING_PREFIX) {
                continue;
            }

            let file_type = entry.file_type()?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };
            entries.push(DirEntry { name, kind });
        }

        trace!("read_dir({}): {} entries", path, entries.len());
        Ok(entries)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn FileHandle>> {
        let full = self.resolve(path)?;
        let file = File::open(&full)?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {}", path),
            ));
        }

        Ok(Box::new(LocalFile {
            file,
            size: metadata.len(),
        }))
    }

    fn create(&self, path: &str) -> io::Result<Box<dyn StagedFile>> {
        let destination = self.resolve(path)?;
        let parent = destination.parent().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no parent directory: {}", path),
            )
        })?;

        let temp = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(parent)?;

        Ok(Box::new(LocalStagedFile { temp, destination }))
    }

    fn make_dir(&self, path: &str) -> io::Result<()> {
        let full = self.resolve(path)?;
        fs::create_dir(full)
    }
}

/// Read-only handle using positional reads, so it can be shared across threads.
#[derive(Debug)]
struct LocalFile {
    file: File,
    size: u64,
}

impl FileHandle for LocalFile {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if offset >= self.size {
            return Ok(Vec::new());
        }

        let remaining = self.size - offset;
        let to_read = std::cmp::min(len as u64, remaining) as usize;
        let mut buffer = vec![0u8; to_read];
        let mut filled = 0;

        while filled < to_read {
            match self.file.read_at(&mut buffer[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        buffer.truncate(filled);
        Ok(buffer)
    }
}

#[derive(Debug)]
struct LocalStagedFile {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl StagedFile for LocalStagedFile {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.temp.as_file().write_all_at(data, offset)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.as_file().sync_data()
    }

    fn persist(self: Box<Self>) -> io::Result<()> {
        let LocalStagedFile { temp, destination } = *self;
        fs::set_permissions(temp.path(), Permissions::from_mode(PERSISTED_MODE))?;
        temp.persist(&destination)
            .map(|_| ())
            .map_err(|err| err.error)
    }
}

fn metadata_to_attributes(metadata: &fs::Metadata) -> Attributes {
    let kind = if metadata.is_dir() {
        EntryKind::Directory
    } else if metadata.file_type().is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };

    let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);
    let atime = metadata.accessed().unwrap_or(mtime);
    let ctime = UNIX_EPOCH + Duration::from_secs(metadata.ctime().max(0) as u64);

    Attributes {
        kind,
        size: metadata.size(),
        perm: (metadata.mode() & 0o7777) as u16,
        nlink: metadata.nlink() as u32,
        uid: metadata.uid(),
        gid: metadata.gid(),
        atime,
        mtime,
        ctime: if ctime == UNIX_EPOCH { mtime } else { ctime },
    }
}
