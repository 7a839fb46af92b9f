//! WebDAV filesystem implementation for the thumbnail overlay.
//!
//! This module implements the `dav_server::fs::DavFileSystem` trait on top of
//! the resolver. Resolver calls block on disk I/O and image work, so they run
//! on tokio's blocking pool.

use crate::error::Error;
use crate::store::{Attributes, DirEntry, EntryKind, FileHandle};
use crate::vfs::{OpenFlags, VirtualFsResolver};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsStream, OpenOptions,
    ReadDirMeta,
};
use futures::stream;
use log::{debug, trace};
use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

/// WebDAV filesystem adapter for the thumbnail overlay.
#[derive(Clone)]
pub struct ThumbDavFs {
    inner: Arc<ThumbDavFsInner>,
}

struct ThumbDavFsInner {
    resolver: Arc<VirtualFsResolver>,
    /// Timestamp for synthetic directories.
    created: SystemTime,
}

impl ThumbDavFs {
    pub fn new(resolver: Arc<VirtualFsResolver>) -> Self {
        Self {
            inner: Arc::new(ThumbDavFsInner {
                resolver,
                created: SystemTime::now(),
            }),
        }
    }

    pub fn resolver(&self) -> &VirtualFsResolver {
        &self.inner.resolver
    }
}

impl DavFileSystem for ThumbDavFs {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        trace!("open({:?}, {:?})", path, options);

        let flags = OpenFlags {
            write: options.write,
            append: options.append,
            create: options.create || options.create_new,
            truncate: options.truncate,
        };
        let rel = rel_path(path);
        let resolver = self.inner.resolver.clone();

        Box::pin(async move {
            let handle = tokio::task::spawn_blocking(move || resolver.open(&rel, flags))
                .await
                .map_err(|_| FsError::GeneralFailure)?
                .map_err(fs_error)?;

            Ok(Box::new(ThumbDavFile::new(handle)) as Box<dyn DavFile>)
        })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        trace!("read_dir({:?}, {:?})", path, meta);

        let rel = rel_path(path);
        let resolver = self.inner.resolver.clone();
        let created = self.inner.created;

        Box::pin(async move {
            let entries = tokio::task::spawn_blocking(move || {
                resolver.attributes(&rel)?;
                let listing = resolver.list_directory(&rel);
                Ok::<_, Error>(dir_entries(&resolver, &rel, listing, created))
            })
            .await
            .map_err(|_| FsError::GeneralFailure)?
            .map_err(fs_error)?;

            debug!("read_dir: returning {} entries", entries.len());

            let stream = stream::iter(entries.into_iter().map(Ok));
            Ok(Box::pin(stream) as FsStream<Box<dyn DavDirEntry>>)
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        trace!("metadata({:?})", path);

        let rel = rel_path(path);
        let resolver = self.inner.resolver.clone();

        Box::pin(async move {
            let attr = tokio::task::spawn_blocking(move || resolver.attributes(&rel))
                .await
                .map_err(|_| FsError::GeneralFailure)?
                .map_err(fs_error)?;

            Ok(Box::new(ThumbDavMetaData::from_attributes(&attr)) as Box<dyn DavMetaData>)
        })
    }
}

fn rel_path(path: &DavPath) -> String {
    path.as_rel_ospath()
        .to_string_lossy()
        .trim_matches('/')
        .to_string()
}

fn fs_error(err: Error) -> FsError {
    match err {
        Error::NotFound(_) | Error::Malformed(_) => FsError::NotFound,
        Error::PermissionDenied(_) => FsError::Forbidden,
        Error::DecodeFailure(_) | Error::BackingStore(_) | Error::Config(_) => {
            FsError::GeneralFailure
        }
    }
}

/// Build listing entries; files get their resolved size, directories do not need a lookup.
fn dir_entries(
    resolver: &VirtualFsResolver,
    dir: &str,
    listing: Vec<DirEntry>,
    created: SystemTime,
) -> Vec<Box<dyn DavDirEntry>> {
    listing
        .into_iter()
        .map(|entry| {
            let meta = match entry.kind {
                EntryKind::Directory => ThumbDavMetaData::directory(created),
                _ => {
                    let child = if dir.is_empty() {
                        entry.name.clone()
                    } else {
                        format!("{}/{}", dir, entry.name)
                    };
                    match resolver.attributes(&child) {
                        Ok(attr) => ThumbDavMetaData::from_attributes(&attr),
                        Err(_) => ThumbDavMetaData::file(0, created),
                    }
                }
            };
            Box::new(ThumbDavDirEntry {
                name: entry.name,
                meta,
            }) as Box<dyn DavDirEntry>
        })
        .collect()
}

/// WebDAV file reading from an open overlay handle.
struct ThumbDavFile {
    handle: Arc<dyn FileHandle>,
    /// Current read position.
    position: u64,
}

impl ThumbDavFile {
    fn new(handle: Box<dyn FileHandle>) -> Self {
        Self {
            handle: Arc::from(handle),
            position: 0,
        }
    }
}

impl fmt::Debug for ThumbDavFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbDavFile")
            .field("size", &self.handle.size())
            .field("position", &self.position)
            .finish()
    }
}

impl DavFile for ThumbDavFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = ThumbDavMetaData::file(self.handle.size(), SystemTime::now());
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, bytes::Bytes> {
        let handle = self.handle.clone();
        let offset = self.position;

        Box::pin(async move {
            let data = tokio::task::spawn_blocking(move || handle.read_at(offset, count))
                .await
                .map_err(|_| FsError::GeneralFailure)?
                .map_err(|_| FsError::GeneralFailure)?;

            self.position += data.len() as u64;
            Ok(bytes::Bytes::from(data))
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        let new_pos = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => self.handle.size() as i64 + n,
            SeekFrom::Current(n) => self.position as i64 + n,
        };

        if new_pos < 0 {
            return Box::pin(async { Err(FsError::GeneralFailure) });
        }

        self.position = new_pos as u64;
        let pos = self.position;
        Box::pin(async move { Ok(pos) })
    }

    fn write_buf(&mut self, _buf: Box<dyn bytes::Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn write_bytes(&mut self, _buf: bytes::Bytes) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// WebDAV directory entry.
struct ThumbDavDirEntry {
    name: String,
    meta: ThumbDavMetaData,
}

impl DavDirEntry for ThumbDavDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }
}

/// WebDAV metadata for files and directories.
#[derive(Clone, Debug)]
struct ThumbDavMetaData {
    is_dir: bool,
    len: u64,
    modified: SystemTime,
    created: SystemTime,
}

impl ThumbDavMetaData {
    fn directory(time: SystemTime) -> Self {
        Self {
            is_dir: true,
            len: 0,
            modified: time,
            created: time,
        }
    }

    fn file(len: u64, time: SystemTime) -> Self {
        Self {
            is_dir: false,
            len,
            modified: time,
            created: time,
        }
    }

    fn from_attributes(attr: &Attributes) -> Self {
        Self {
            is_dir: attr.is_dir(),
            len: attr.size,
            modified: attr.mtime,
            created: attr.ctime,
        }
    }
}

impl DavMetaData for ThumbDavMetaData {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> Result<SystemTime, FsError> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn created(&self) -> Result<SystemTime, FsError> {
        Ok(self.created)
    }
}
