use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry, ReplyOpen,
    Request,
};
use lasso::{Key, Spur, ThreadedRodeo};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::runtime::Handle;
use tracing::debug;
use wfs_core::{Engine, EntryKind, engine_path};

use crate::vfs::{Attributes, Vfs};

const BLOCK_SIZE: u32 = 512;
const TTL: Duration = Duration::from_secs(1);

/// Where FUSE requests are serviced.
#[derive(Clone, Debug)]
pub enum Dispatch {
    /// On the session thread, one request at a time.
    Inline,
    /// On a tokio blocking pool; requests run concurrently.
    Pool(Handle),
}

impl Dispatch {
    fn run<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Dispatch::Inline => job(),
            Dispatch::Pool(handle) => {
                handle.spawn_blocking(job);
            }
        }
    }
}

/// Inode numbers for engine paths.
///
/// Paths are interned so that the same path always maps to the same inode
/// for the lifetime of the mount. Only names are kept here; objects are
/// resolved again on every request.
#[derive(Clone)]
pub struct InodeTable {
    paths: Arc<ThreadedRodeo<Spur>>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let paths = ThreadedRodeo::new();
        // Reserve indices so that '/' maps to ino=1
        paths.get_or_intern("");
        paths.get_or_intern("/");
        Self {
            paths: Arc::new(paths),
        }
    }

    /// Maps a 64-bit inode number back to its engine path.
    pub fn path_for_ino(&self, ino: u64) -> Option<String> {
        let spur = Spur::try_from_usize(usize::try_from(ino).ok()?)?;
        let res = self.paths.try_resolve(&spur).map(|s| s.to_string());
        if res.is_none() {
            debug!("path_for_ino({}) -> None", ino);
        }
        res
    }

    /// Maps an engine path to a stable 64-bit inode number.
    pub fn ino_for_path(&self, path: &str) -> u64 {
        self.paths.get_or_intern(path).into_usize() as u64
    }
}

/// FUSE front of a [`Vfs`].
pub struct WfsFs<E> {
    vfs: Vfs<E>,
    inodes: InodeTable,
    dispatch: Dispatch,
}

impl<E: Engine + 'static> WfsFs<E> {
    pub fn new(vfs: Vfs<E>, dispatch: Dispatch) -> Self {
        Self {
            vfs,
            inodes: InodeTable::new(),
            dispatch,
        }
    }
}

pub(crate) fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::File => FileType::RegularFile,
        EntryKind::Link => FileType::Symlink,
    }
}

pub(crate) fn make_attr(ino: u64, attrs: &Attributes) -> FileAttr {
    FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.size.div_ceil(BLOCK_SIZE as u64),
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind: file_type(attrs.kind),
        perm: attrs.perm,
        nlink: attrs.nlink,
        uid: 0,
        gid: 0,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE,
    }
}

impl<E: Engine + 'static> Filesystem for WfsFs<E> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.path_for_ino(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = engine_path::join(&parent_path, &name.to_string_lossy());
        let vfs = self.vfs.clone();
        let inodes = self.inodes.clone();
        self.dispatch.run(move || match vfs.attributes(&path) {
            Ok(attrs) => {
                let ino = inodes.ino_for_path(&path);
                reply.entry(&TTL, &make_attr(ino, &attrs), 0);
            }
            Err(e) => reply.error(e.errno()),
        });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path_for_ino(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let vfs = self.vfs.clone();
        self.dispatch.run(move || match vfs.attributes(&path) {
            Ok(attrs) => reply.attr(&TTL, &make_attr(ino, &attrs)),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.inodes.path_for_ino(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let vfs = self.vfs.clone();
        self.dispatch.run(move || match vfs.read_link(&path) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path_for_ino(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let vfs = self.vfs.clone();
        self.dispatch.run(move || match vfs.open_for_read(&path, flags) {
            // No handle table: reads re-resolve the path.
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.inodes.path_for_ino(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let vfs = self.vfs.clone();
        self.dispatch.run(move || {
            let mut buf = vec![0u8; size as usize];
            match vfs.read(&path, &mut buf, offset) {
                Ok(n) => reply.data(&buf[..n]),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("Reading directory ino={} offset={}", ino, offset);
        let Some(path) = self.inodes.path_for_ino(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let vfs = self.vfs.clone();
        let inodes = self.inodes.clone();
        self.dispatch.run(move || {
            let entries = match vfs.list_directory(&path) {
                Ok(entries) => entries,
                Err(e) => {
                    reply.error(e.errno());
                    return;
                }
            };
            let start = usize::try_from(offset).unwrap_or(0);
            for (i, entry) in entries.iter().enumerate().skip(start) {
                let child_ino = inodes.ino_for_path(&entry.path);
                // The offset handed back is where the next call resumes.
                if reply.add(child_ino, (i + 1) as i64, file_type(entry.kind), &entry.name) {
                    break;
                }
            }
            reply.ok();
        });
    }
}
