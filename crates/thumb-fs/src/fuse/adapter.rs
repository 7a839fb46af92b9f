//! FUSE adapter implementation for the thumbnail overlay.
//!
//! This module implements the `fuser::Filesystem` trait for `ThumbFuseFS`.
//! fuser addresses entries by inode while the resolver works on paths, so
//! inodes are handed out when the kernel looks a path up and dropped again
//! once it forgets every reference.

use crate::error::Error;
use crate::store::{Attributes, EntryKind, FileHandle};
use crate::vfs::{OpenFlags, VirtualFsResolver};
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, Request, FUSE_ROOT_ID,
};
use libc::{c_int, EACCES, EINVAL, EIO, ENOENT, EPERM};
use log::{debug, error, trace, warn};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Time-to-live for cached attributes.
const TTL: Duration = Duration::from_secs(1);

/// Block size for filesystem statistics.
const BLOCK_SIZE: u32 = 512;

/// Inode reported by `readdir` for entries the kernel has not looked up.
/// The kernel resolves real inodes through `lookup`.
const UNKNOWN_INO: u64 = u64::MAX;

/// FUSE filesystem adapter for the thumbnail overlay.
pub struct ThumbFuseFS {
    resolver: Arc<VirtualFsResolver>,
    /// Inode to overlay path.
    inode_to_path: HashMap<u64, String>,
    /// Overlay path to inode.
    path_to_inode: HashMap<String, u64>,
    /// Outstanding kernel lookups per inode.
    lookups: HashMap<u64, u64>,
    next_inode: u64,
    /// Open file handles by `fh`.
    handles: HashMap<u64, Box<dyn FileHandle>>,
    next_fh: u64,
}

impl ThumbFuseFS {
    pub fn new(resolver: Arc<VirtualFsResolver>) -> Self {
        let mut inode_to_path = HashMap::new();
        let mut path_to_inode = HashMap::new();

        // Inode 1 is the root
        inode_to_path.insert(FUSE_ROOT_ID, String::new());
        path_to_inode.insert(String::new(), FUSE_ROOT_ID);

        Self {
            resolver,
            inode_to_path,
            path_to_inode,
            lookups: HashMap::new(),
            next_inode: FUSE_ROOT_ID + 1,
            handles: HashMap::new(),
            next_fh: 1,
        }
    }

    /// Number of currently open file handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Number of inodes currently assigned, the root included.
    pub fn known_inodes(&self) -> usize {
        self.inode_to_path.len()
    }

    /// Return the inode for `path`, assigning one if needed, and count one
    /// kernel lookup against it.
    fn remember(&mut self, path: &str) -> u64 {
        let inode = match self.path_to_inode.get(path) {
            Some(&inode) => inode,
            None => {
                let inode = self.next_inode;
                self.next_inode += 1;
                self.path_to_inode.insert(path.to_string(), inode);
                self.inode_to_path.insert(inode, path.to_string());
                inode
            }
        };
        *self.lookups.entry(inode).or_insert(0) += 1;
        inode
    }

    /// Drop `nlookup` references; the inode is released when none remain.
    fn release_lookups(&mut self, inode: u64, nlookup: u64) {
        if inode == FUSE_ROOT_ID {
            return;
        }

        let remaining = match self.lookups.get_mut(&inode) {
            Some(count) => {
                *count = count.saturating_sub(nlookup);
                *count
            }
            None => return,
        };

        if remaining == 0 {
            self.lookups.remove(&inode);
            if let Some(path) = self.inode_to_path.remove(&inode) {
                self.path_to_inode.remove(&path);
            }
        }
    }

    fn path_of(&self, inode: u64) -> Option<String> {
        self.inode_to_path.get(&inode).cloned()
    }

    /// Entries of directory `ino`, including `.` and `..`. Only inodes the
    /// kernel already holds are reported; no new ones are assigned.
    fn listing(&self, ino: u64) -> Option<Vec<(u64, FileType, String)>> {
        let path = self.path_of(ino)?;

        let parent_inode = match path.rsplit_once('/') {
            Some((parent, _)) => self
                .path_to_inode
                .get(parent)
                .copied()
                .unwrap_or(UNKNOWN_INO),
            None => FUSE_ROOT_ID,
        };

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_inode, FileType::Directory, "..".to_string()),
        ];

        for entry in self.resolver.list_directory(&path) {
            let child = self
                .path_to_inode
                .get(&join(&path, &entry.name))
                .copied()
                .unwrap_or(UNKNOWN_INO);
            entries.push((child, to_file_type(entry.kind), entry.name));
        }

        Some(entries)
    }
}

impl Filesystem for ThumbFuseFS {
    /// Look up a directory entry by name.
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name_str = name.to_string_lossy();
        trace!("lookup(parent={}, name='{}')", parent, name_str);

        let parent_path = match self.path_of(parent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let path = join(&parent_path, &name_str);

        match self.resolver.attributes(&path) {
            Ok(attr) => {
                let inode = self.remember(&path);
                reply.entry(&TTL, &to_file_attr(inode, &attr), 0);
            }
            Err(e) => {
                debug!("lookup: {} -> {}", path, e);
                reply.error(errno(&e));
            }
        }
    }

    /// Forget inodes the kernel no longer references.
    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        trace!("forget(ino={}, nlookup={})", ino, nlookup);
        self.release_lookups(ino, nlookup);
    }

    /// Get file attributes.
    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!("getattr(ino={})", ino);

        let path = match self.path_of(ino) {
            Some(p) => p,
            None => {
                warn!("getattr: inode {} not found", ino);
                reply.error(ENOENT);
                return;
            }
        };

        match self.resolver.attributes(&path) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(ino, &attr)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    /// Read directory entries.
    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!("readdir(ino={}, offset={})", ino, offset);

        let entries = match self.listing(ino) {
            Some(entries) => entries,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        // Skip to offset and add entries until buffer is full
        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            let full = reply.add(ino, (i + 1) as i64, kind, name);
            if full {
                break;
            }
        }

        reply.ok();
    }

    /// Open a file, generating the thumbnail if it does not exist yet.
    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!("open(ino={}, flags={:#o})", ino, flags);

        let path = match self.path_of(ino) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.resolver.open(&path, open_flags(flags)) {
            Ok(handle) => {
                let fh = self.next_fh;
                self.next_fh += 1;
                self.handles.insert(fh, handle);
                // Attribute lookups may have reported the original's size.
                reply.opened(fh, fuser::consts::FOPEN_DIRECT_IO);
            }
            Err(e) => {
                if !e.is_not_found() {
                    error!("open: {} failed: {}", path, e);
                }
                reply.error(errno(&e));
            }
        }
    }

    /// Read file data.
    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        let handle = match self.handles.get(&fh) {
            Some(h) => h,
            None => {
                warn!("read: unknown file handle {}", fh);
                reply.error(EIO);
                return;
            }
        };

        match handle.read_at(offset as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                error!("read: I/O error on inode {}: {}", ino, e);
                reply.error(EIO);
            }
        }
    }

    /// Release an open file.
    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!("release(fh={})", fh);
        self.handles.remove(&fh);
        reply.ok();
    }

    /// Get filesystem statistics.
    fn statfs(&mut self, _req: &Request, _ino: u64, reply: fuser::ReplyStatfs) {
        trace!("statfs");

        reply.statfs(
            0,                               // total blocks
            0,                               // free blocks
            0,                               // available blocks
            self.inode_to_path.len() as u64, // total inodes
            0,                               // free inodes
            BLOCK_SIZE,
            255, // max name length
            BLOCK_SIZE,
        );
    }
}

/// Map a resolver error to the errno reported to the kernel.
pub fn errno(err: &Error) -> c_int {
    match err {
        Error::NotFound(_) | Error::Malformed(_) => ENOENT,
        Error::PermissionDenied(_) => EPERM,
        Error::BackingStore(e) if e.kind() == io::ErrorKind::PermissionDenied => EACCES,
        Error::DecodeFailure(_) | Error::BackingStore(_) | Error::Config(_) => EIO,
    }
}

/// Translate raw `open(2)` flags.
pub fn open_flags(flags: i32) -> OpenFlags {
    let access = flags & libc::O_ACCMODE;
    OpenFlags {
        write: access == libc::O_WRONLY || access == libc::O_RDWR,
        append: flags & libc::O_APPEND != 0,
        create: flags & libc::O_CREAT != 0,
        truncate: flags & libc::O_TRUNC != 0,
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn to_file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::File => FileType::RegularFile,
        EntryKind::Directory => FileType::Directory,
        EntryKind::Symlink => FileType::Symlink,
    }
}

fn to_file_attr(inode: u64, attr: &Attributes) -> FileAttr {
    FileAttr {
        ino: inode,
        size: attr.size,
        blocks: (attr.size + (BLOCK_SIZE as u64) - 1) / (BLOCK_SIZE as u64),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.mtime,
        kind: to_file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn mount_options(read_only: bool) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName("thumbfs".to_string()),
        MountOption::Subtype("thumb".to_string()),
        MountOption::DefaultPermissions,
    ];
    if read_only {
        options.push(MountOption::RO);
    }
    options
}

/// Mount the overlay and block until it is unmounted.
///
/// # Errors
///
/// Returns an error if the mount point is invalid or FUSE mounting fails.
pub fn mount<P: AsRef<Path>>(
    resolver: Arc<VirtualFsResolver>,
    mount_point: P,
    read_only: bool,
) -> io::Result<()> {
    let fs = ThumbFuseFS::new(resolver);
    let mount_point = mount_point.as_ref();

    debug!("Mounting thumbfs at {}", mount_point.display());

    fuser::mount2(fs, mount_point, &mount_options(read_only))
        .map_err(|e| io::Error::new(e.kind(), format!("FUSE mount failed: {}", e)))
}

/// Mount the overlay in the background and return a session handle.
///
/// The filesystem stays mounted until the returned `BackgroundSession` is
/// dropped or joined.
pub fn mount_background<P: AsRef<Path>>(
    resolver: Arc<VirtualFsResolver>,
    mount_point: P,
    read_only: bool,
) -> io::Result<fuser::BackgroundSession> {
    let fs = ThumbFuseFS::new(resolver);
    let mount_point = mount_point.as_ref();

    debug!("Mounting thumbfs at {} (background)", mount_point.display());

    fuser::spawn_mount2(fs, mount_point, &mount_options(read_only))
        .map_err(|e| io::Error::new(e.kind(), format!("FUSE mount failed: {}", e)))
}
