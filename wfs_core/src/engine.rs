//! Contract between the front ends and a filesystem engine.
//!
//! An engine owns everything on-disk: sector geometry, metadata trees and
//! payload decryption. The front ends only ever see the closed [`Entry`]
//! variant, lazy child listings and seekable payload streams.

use std::fmt;
use std::io::{Read, Seek};
use std::path::Path;

use crate::context::Geometry;
use crate::derive::DeviceKey;
use crate::error::EngineError;

/// A read-only, seekable byte stream over a decrypted file payload.
///
/// Reads may come back short at end of stream; a short read is never an
/// error by itself.
pub trait SeekableReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekableReader for T {}

/// Lazily produced children of one directory, in engine order.
pub type Children<'a> = Box<dyn Iterator<Item = Result<Entry, EngineError>> + Send + 'a>;

/// Resolves absolute engine paths to typed objects.
pub trait Engine: Send + Sync {
    /// Looks up an absolute path; `Ok(None)` means the path does not exist.
    fn resolve(&self, path: &str) -> Result<Option<Entry>, EngineError>;

    /// Lists the immediate children of `dir`. Each call starts over.
    fn children(&self, dir: &DirectoryEntry) -> Result<Children<'_>, EngineError>;

    /// Opens a fresh stream over the payload of `file`.
    fn open_stream(&self, file: &FileEntry) -> Result<Box<dyn SeekableReader>, EngineError>;

    /// Like [`Engine::resolve`] but yields `None` for anything but a directory.
    fn resolve_directory(&self, path: &str) -> Result<Option<DirectoryEntry>, EngineError> {
        Ok(self.resolve(path)?.and_then(Entry::into_directory))
    }
}

/// Opens a block device with a derived key.
///
/// Front ends call the probes once, in order (sector size, then sector
/// count), before `open`.
pub trait EngineBackend {
    type Engine: Engine + 'static;

    fn detect_sector_size(&self, device: &Path, key: &DeviceKey)
    -> Result<SectorSize, EngineError>;

    fn detect_sectors_count(
        &self,
        device: &Path,
        key: &DeviceKey,
        sector_size: SectorSize,
    ) -> Result<u64, EngineError>;

    fn open(
        &self,
        device: &Path,
        key: &DeviceKey,
        geometry: Geometry,
    ) -> Result<Self::Engine, EngineError>;
}

/// Sector sizes a volume may be formatted with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SectorSize {
    #[default]
    S512,
    S2048,
    S4096,
}

impl SectorSize {
    pub const ALL: [SectorSize; 3] = [SectorSize::S512, SectorSize::S2048, SectorSize::S4096];

    pub fn bytes(self) -> u32 {
        1 << self.log2()
    }

    pub fn log2(self) -> u32 {
        match self {
            SectorSize::S512 => 9,
            SectorSize::S2048 => 11,
            SectorSize::S4096 => 12,
        }
    }
}

impl TryFrom<u32> for SectorSize {
    type Error = EngineError;

    fn try_from(bytes: u32) -> Result<Self, Self::Error> {
        match bytes {
            512 => Ok(SectorSize::S512),
            2048 => Ok(SectorSize::S2048),
            4096 => Ok(SectorSize::S4096),
            other => Err(EngineError::UnsupportedSectorSize(other)),
        }
    }
}

impl fmt::Display for SectorSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Link,
}

/// A filesystem object as seen through an engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    Directory(DirectoryEntry),
    File(FileEntry),
    Link(LinkEntry),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    /// Number of immediate children.
    pub child_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
}

/// A symbolic link. Link targets are not exposed by engines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkEntry {
    pub name: String,
    pub path: String,
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Directory(_) => EntryKind::Directory,
            Entry::File(_) => EntryKind::File,
            Entry::Link(_) => EntryKind::Link,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entry::Directory(d) => &d.name,
            Entry::File(f) => &f.name,
            Entry::Link(l) => &l.name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Entry::Directory(d) => &d.path,
            Entry::File(f) => &f.path,
            Entry::Link(l) => &l.path,
        }
    }

    pub fn as_directory(&self) -> Option<&DirectoryEntry> {
        match self {
            Entry::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Entry::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Entry::Link(_))
    }

    pub fn into_directory(self) -> Option<DirectoryEntry> {
        match self {
            Entry::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_file(self) -> Option<FileEntry> {
        match self {
            Entry::File(f) => Some(f),
            _ => None,
        }
    }
}

/// Helpers for absolute, `/`-separated engine paths.
pub mod engine_path {
    /// Collapses repeated separators and drops `.` components; the result
    /// always starts with `/` and never ends with one (except the root).
    pub fn normalize(path: &str) -> String {
        let parts: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        if parts.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", parts.join("/"))
        }
    }

    pub fn join(parent: &str, name: &str) -> String {
        if parent == "/" || parent.is_empty() {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent.trim_end_matches('/'), name)
        }
    }

    /// Last component of `path`, or `""` for the root.
    pub fn file_name(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or("")
    }

    /// Parent of `path`; the root is its own parent.
    pub fn parent(path: &str) -> &str {
        match path.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &path[..idx],
        }
    }
}
