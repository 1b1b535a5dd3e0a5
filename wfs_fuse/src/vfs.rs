//! Path-based, read-only view of a mounted volume.
//!
//! Every call resolves its path from scratch through the [`MountContext`];
//! nothing is cached between calls and no file handles are handed out, so
//! a [`Vfs`] can be cloned freely and used from several threads at once.
//!
//! Absent paths, wrong object types and engine failures all surface as
//! [`VfsError::NotFound`]. Engine failures are logged so they can still be
//! told apart in the output.

use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{debug, warn};
use wfs_core::{DirectoryEntry, Engine, Entry, EntryKind, FileEntry, MountContext, engine_path};

pub const DIR_PERM: u16 = 0o755;
pub const FILE_PERM: u16 = 0o444;
pub const LINK_PERM: u16 = 0o777;

const LISTING_HINT_MAX: u64 = 1024;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
}

impl VfsError {
    pub fn errno(self) -> libc::c_int {
        match self {
            VfsError::NotFound => libc::ENOENT,
            VfsError::PermissionDenied => libc::EACCES,
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

/// Attributes reported for one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub kind: EntryKind,
    pub perm: u16,
    pub nlink: u32,
    pub size: u64,
}

/// One row of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirListing {
    pub name: String,
    /// Engine path the row refers to (`.` and `..` point at real directories).
    pub path: String,
    pub kind: EntryKind,
}

pub struct Vfs<E> {
    ctx: Arc<MountContext<E>>,
}

impl<E> Clone for Vfs<E> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<E: Engine> Vfs<E> {
    pub fn new(ctx: Arc<MountContext<E>>) -> Self {
        Self { ctx }
    }

    fn resolve(&self, path: &str) -> VfsResult<Entry> {
        match self.ctx.engine().resolve(path) {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) => Err(VfsError::NotFound),
            Err(e) => {
                warn!("resolve({path}) failed: {e}");
                Err(VfsError::NotFound)
            }
        }
    }

    fn resolve_directory(&self, path: &str) -> VfsResult<DirectoryEntry> {
        self.resolve(path)?
            .into_directory()
            .ok_or(VfsError::NotFound)
    }

    fn resolve_file(&self, path: &str) -> VfsResult<FileEntry> {
        self.resolve(path)?.into_file().ok_or(VfsError::NotFound)
    }

    pub fn attributes(&self, path: &str) -> VfsResult<Attributes> {
        let attrs = match self.resolve(path)? {
            Entry::Directory(dir) => Attributes {
                kind: EntryKind::Directory,
                perm: DIR_PERM,
                nlink: u32::try_from(dir.child_count.saturating_add(2)).unwrap_or(u32::MAX),
                size: 0,
            },
            Entry::File(file) => Attributes {
                kind: EntryKind::File,
                perm: FILE_PERM,
                nlink: 1,
                size: file.size,
            },
            // Link targets are not exposed by the engine, so the size stays 0.
            Entry::Link(_) => Attributes {
                kind: EntryKind::Link,
                perm: LINK_PERM,
                nlink: 1,
                size: 0,
            },
        };
        Ok(attrs)
    }

    /// Lists `.` and `..` followed by the children in engine order.
    ///
    /// A child that fails to resolve is left out of the listing.
    pub fn list_directory(&self, path: &str) -> VfsResult<Vec<DirListing>> {
        let dir = self.resolve_directory(path)?;
        let children = self.ctx.engine().children(&dir).map_err(|e| {
            warn!("listing {} failed: {e}", dir.path);
            VfsError::NotFound
        })?;

        // child_count comes from volume metadata; only use it as a bounded hint.
        let hint = usize::try_from(dir.child_count.min(LISTING_HINT_MAX)).unwrap_or(0);
        let mut entries = Vec::with_capacity(2 + hint);
        entries.push(DirListing {
            name: ".".into(),
            path: dir.path.clone(),
            kind: EntryKind::Directory,
        });
        entries.push(DirListing {
            name: "..".into(),
            path: engine_path::parent(&dir.path).to_string(),
            kind: EntryKind::Directory,
        });
        for child in children {
            match child {
                Ok(child) => entries.push(DirListing {
                    name: child.name().to_string(),
                    path: child.path().to_string(),
                    kind: child.kind(),
                }),
                Err(e) => warn!("skipping unreadable entry in {}: {e}", dir.path),
            }
        }
        Ok(entries)
    }

    /// Checks that `path` exists and `flags` ask for read-only access.
    pub fn open_for_read(&self, path: &str, flags: i32) -> VfsResult<()> {
        self.resolve(path)?;
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(VfsError::PermissionDenied);
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at `offset`; 0 at or past end of file.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        let file = self.resolve_file(path)?;
        if offset >= file.size || buf.is_empty() {
            return Ok(0);
        }
        let want = (file.size - offset).min(buf.len() as u64) as usize;

        let mut stream = self.ctx.engine().open_stream(&file).map_err(|e| {
            warn!("open_stream({path}) failed: {e}");
            VfsError::NotFound
        })?;
        stream.seek(SeekFrom::Start(offset)).map_err(|e| {
            warn!("seek({path}, {offset}) failed: {e}");
            VfsError::NotFound
        })?;

        let mut filled = 0;
        while filled < want {
            match stream.read(&mut buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if filled > 0 => {
                    debug!("short read of {path} at {offset}: {e}");
                    break;
                }
                Err(e) => {
                    warn!("read({path}, {offset}) failed: {e}");
                    return Err(VfsError::NotFound);
                }
            }
        }
        Ok(filled)
    }

    /// Link targets are not available from the engine; always `NotFound`.
    pub fn read_link(&self, path: &str) -> VfsResult<String> {
        let entry = self.resolve(path)?;
        if !entry.is_link() {
            return Err(VfsError::NotFound);
        }
        debug!("readlink({path}): link targets are not supported");
        Err(VfsError::NotFound)
    }
}
