//! Engine over a host directory that already holds a decoded volume tree.
//!
//! Regular files, directories and symlinks map onto the three engine object
//! kinds. There is no block device underneath, so the backend reports a
//! 512-byte sector and derives the sector count from the payload size.

use std::fs::{self, File, FileType};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use wfs_core::{
    Children, DeviceKey, DirectoryEntry, Engine, EngineBackend, EngineError, Entry, FileEntry,
    Geometry, LinkEntry, SectorSize, SeekableReader, engine_path,
};

/// Host file types that surface as engine objects; everything else is hidden.
fn is_exposed(file_type: FileType) -> bool {
    file_type.is_symlink() || file_type.is_dir() || file_type.is_file()
}

#[derive(Debug, Clone)]
pub struct LocalEngine {
    base_path: PathBuf,
}

impl LocalEngine {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalEngine {
            base_path: base_path.into(),
        }
    }

    /// Maps an engine path below `base_path`; `None` if it would escape it.
    fn host_path(&self, path: &str) -> Option<PathBuf> {
        let rel = engine_path::normalize(path);
        let rel = Path::new(rel.trim_start_matches('/'));
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.base_path.join(rel))
    }

    fn entry_at(&self, path: String, host: &Path) -> Result<Option<Entry>, EngineError> {
        let meta = match fs::symlink_metadata(host) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let name = engine_path::file_name(&path).to_string();
        let file_type = meta.file_type();
        let entry = if file_type.is_symlink() {
            Entry::Link(LinkEntry { name, path })
        } else if file_type.is_dir() {
            let child_count = fs::read_dir(host)?
                .filter_map(Result::ok)
                .filter(|item| item.file_type().is_ok_and(is_exposed))
                .count() as u64;
            Entry::Directory(DirectoryEntry {
                name,
                path,
                child_count,
            })
        } else if file_type.is_file() {
            Entry::File(FileEntry {
                name,
                path,
                size: meta.len(),
            })
        } else {
            debug!("skipping special file {}", host.display());
            return Ok(None);
        };
        Ok(Some(entry))
    }
}

impl Engine for LocalEngine {
    fn resolve(&self, path: &str) -> Result<Option<Entry>, EngineError> {
        let Some(host) = self.host_path(path) else {
            return Ok(None);
        };
        self.entry_at(engine_path::normalize(path), &host)
    }

    fn children(&self, dir: &DirectoryEntry) -> Result<Children<'_>, EngineError> {
        let host = self
            .host_path(&dir.path)
            .ok_or_else(|| EngineError::Decode(format!("invalid path {}", dir.path)))?;
        let parent = dir.path.clone();
        let iter = fs::read_dir(host)?.filter_map(move |item| {
            let item = match item {
                Ok(item) => item,
                Err(e) => return Some(Err(e.into())),
            };
            let name = item.file_name().to_string_lossy().into_owned();
            let path = engine_path::join(&parent, &name);
            self.entry_at(path, &item.path()).transpose()
        });
        Ok(Box::new(iter))
    }

    fn open_stream(&self, file: &FileEntry) -> Result<Box<dyn SeekableReader>, EngineError> {
        let host = self
            .host_path(&file.path)
            .ok_or_else(|| EngineError::Decode(format!("invalid path {}", file.path)))?;
        Ok(Box::new(File::open(host)?))
    }
}

/// Opens a [`LocalEngine`] on the directory given as the device path.
///
/// The key is not needed to read an already-decoded tree and is ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalBackend;

impl LocalBackend {
    fn check_device(device: &Path) -> Result<(), EngineError> {
        if device.is_dir() {
            Ok(())
        } else {
            Err(EngineError::Decode(format!(
                "{} is not a decoded volume directory",
                device.display()
            )))
        }
    }
}

impl EngineBackend for LocalBackend {
    type Engine = LocalEngine;

    fn detect_sector_size(
        &self,
        device: &Path,
        _key: &DeviceKey,
    ) -> Result<SectorSize, EngineError> {
        Self::check_device(device)?;
        Ok(SectorSize::S512)
    }

    fn detect_sectors_count(
        &self,
        device: &Path,
        _key: &DeviceKey,
        sector_size: SectorSize,
    ) -> Result<u64, EngineError> {
        Self::check_device(device)?;
        let mut total = 0u64;
        for entry in WalkDir::new(device).follow_links(false) {
            let entry = entry.map_err(|e| EngineError::Io(e.into()))?;
            if entry.file_type().is_file() {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(total.div_ceil(u64::from(sector_size.bytes())))
    }

    fn open(
        &self,
        device: &Path,
        _key: &DeviceKey,
        geometry: Geometry,
    ) -> Result<LocalEngine, EngineError> {
        Self::check_device(device)?;
        debug!(
            "opening {} ({} bytes addressable)",
            device.display(),
            geometry.total_bytes()
        );
        Ok(LocalEngine::new(device))
    }
}
