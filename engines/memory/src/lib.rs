//! In-memory filesystem engine.
//!
//! Holds a small object tree in a [`DashMap`] keyed by absolute path and
//! serves it through the [`Engine`] contract. Children keep insertion order.
//! Faults can be injected per path to exercise error handling in the front
//! ends.

use bytes::Bytes;
use dashmap::DashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};
use wfs_core::{
    Children, DeviceKey, DirectoryEntry, Engine, EngineBackend, EngineError, Entry, FileEntry,
    Geometry, LinkEntry, SectorSize, SeekableReader, engine_path,
};

#[derive(Clone, Debug)]
enum Node {
    Dir {
        children: Vec<String>,
    },
    File {
        data: Bytes,
        /// Size reported by the entry; may exceed `data.len()`.
        size: u64,
        fault: Option<ReadFault>,
    },
    Link,
}

/// A fault injected into a file stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFault {
    /// Opening the stream fails.
    Open,
    /// Reads fail once `after` bytes have been served.
    ReadError { after: u64 },
}

#[derive(Clone, Debug)]
pub struct MemoryEngine {
    nodes: Arc<DashMap<String, Node>>,
    /// Paths whose resolution fails with a decode error.
    poisoned: Arc<DashMap<String, ()>>,
}

impl MemoryEngine {
    /// Creates an engine holding only the root directory.
    pub fn new() -> Self {
        let nodes = DashMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Dir {
                children: Vec::new(),
            },
        );
        Self {
            nodes: Arc::new(nodes),
            poisoned: Arc::new(DashMap::new()),
        }
    }

    /// Creates a directory, along with any missing parents.
    pub fn insert_dir(&self, path: &str) -> &Self {
        let path = engine_path::normalize(path);
        if !self.nodes.contains_key(&path) {
            self.attach(&path);
            self.nodes.insert(
                path,
                Node::Dir {
                    children: Vec::new(),
                },
            );
        }
        self
    }

    /// Creates or replaces a file.
    pub fn insert_file(&self, path: &str, data: impl Into<Bytes>) -> &Self {
        let data = data.into();
        let size = data.len() as u64;
        self.put_file(path, data, size, None)
    }

    /// Creates a file whose entry claims `size` bytes regardless of `data`.
    pub fn insert_file_with_size(&self, path: &str, data: impl Into<Bytes>, size: u64) -> &Self {
        self.put_file(path, data.into(), size, None)
    }

    pub fn insert_faulty_file(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        fault: ReadFault,
    ) -> &Self {
        let data = data.into();
        let size = data.len() as u64;
        self.put_file(path, data, size, Some(fault))
    }

    pub fn insert_link(&self, path: &str) -> &Self {
        let path = engine_path::normalize(path);
        self.attach(&path);
        self.nodes.insert(path, Node::Link);
        self
    }

    /// Makes every lookup of `path` fail as if its metadata were corrupt.
    pub fn poison(&self, path: &str) -> &Self {
        self.poisoned.insert(engine_path::normalize(path), ());
        self
    }

    fn put_file(&self, path: &str, data: Bytes, size: u64, fault: Option<ReadFault>) -> &Self {
        let path = engine_path::normalize(path);
        self.attach(&path);
        self.nodes.insert(path, Node::File { data, size, fault });
        self
    }

    /// Registers `path` with its parent directory, creating parents on the way.
    fn attach(&self, path: &str) {
        if path == "/" {
            return;
        }
        let parent = engine_path::parent(path).to_string();
        let name = engine_path::file_name(path).to_string();
        self.insert_dir(&parent);
        if let Some(mut node) = self.nodes.get_mut(&parent)
            && let Node::Dir { children } = node.value_mut()
            && !children.contains(&name)
        {
            children.push(name);
        }
    }

    fn entry_for(&self, path: &str) -> Result<Option<Entry>, EngineError> {
        if self.poisoned.contains_key(path) {
            return Err(EngineError::Decode(format!("corrupt metadata at {path}")));
        }
        let Some(node) = self.nodes.get(path) else {
            return Ok(None);
        };
        let name = engine_path::file_name(path).to_string();
        let path = path.to_string();
        let entry = match node.value() {
            Node::Dir { children } => Entry::Directory(DirectoryEntry {
                name,
                path,
                child_count: children.len() as u64,
            }),
            Node::File { size, .. } => Entry::File(FileEntry {
                name,
                path,
                size: *size,
            }),
            Node::Link => Entry::Link(LinkEntry { name, path }),
        };
        Ok(Some(entry))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MemoryEngine {
    fn resolve(&self, path: &str) -> Result<Option<Entry>, EngineError> {
        self.entry_for(&engine_path::normalize(path))
    }

    fn children(&self, dir: &DirectoryEntry) -> Result<Children<'_>, EngineError> {
        let names = match self.nodes.get(&dir.path).as_deref() {
            Some(Node::Dir { children }) => children.clone(),
            _ => {
                return Err(EngineError::Decode(format!(
                    "{} is no longer a directory",
                    dir.path
                )));
            }
        };
        let parent = dir.path.clone();
        Ok(Box::new(names.into_iter().filter_map(move |name| {
            let path = engine_path::join(&parent, &name);
            self.entry_for(&path).transpose()
        })))
    }

    fn open_stream(&self, file: &FileEntry) -> Result<Box<dyn SeekableReader>, EngineError> {
        let Some(node) = self.nodes.get(&file.path) else {
            return Err(io::Error::from(io::ErrorKind::NotFound).into());
        };
        match node.value() {
            Node::File {
                fault: Some(ReadFault::Open),
                ..
            } => Err(EngineError::Decode(format!(
                "cannot decrypt payload of {}",
                file.path
            ))),
            Node::File {
                data,
                fault: Some(ReadFault::ReadError { after }),
                ..
            } => Ok(Box::new(FailingReader {
                inner: Cursor::new(data.clone()),
                fail_at: *after,
            })),
            Node::File { data, .. } => Ok(Box::new(Cursor::new(data.clone()))),
            _ => Err(EngineError::Decode(format!("{} is not a file", file.path))),
        }
    }
}

/// Serves bytes until `fail_at`, then errors on every read.
struct FailingReader {
    inner: Cursor<Bytes>,
    fail_at: u64,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.inner.position();
        if pos >= self.fail_at {
            return Err(io::Error::other("injected read failure"));
        }
        let allowed = (self.fail_at - pos).min(buf.len() as u64) as usize;
        self.inner.read(&mut buf[..allowed])
    }
}

impl Seek for FailingReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Step recorded by [`MemoryBackend`] while a context is being established.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    SectorSize,
    SectorsCount,
    Open,
}

/// Backend that "opens" a [`MemoryEngine`] for a fixed key and geometry.
#[derive(Debug)]
pub struct MemoryBackend {
    engine: MemoryEngine,
    geometry: Geometry,
    key: Option<DeviceKey>,
    probes: Mutex<Vec<Probe>>,
}

impl MemoryBackend {
    pub fn new(engine: MemoryEngine, geometry: Geometry) -> Self {
        Self {
            engine,
            geometry,
            key: None,
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Only accept `key`; any other key fails like a wrong-key decode would.
    pub fn with_key(mut self, key: DeviceKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Steps performed so far, in call order.
    pub fn probes(&self) -> Vec<Probe> {
        self.probes
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn record(&self, probe: Probe) {
        if let Ok(mut probes) = self.probes.lock() {
            probes.push(probe);
        }
    }

    fn check_key(&self, key: &DeviceKey) -> Result<(), EngineError> {
        match &self.key {
            Some(expected) if expected != key => Err(EngineError::Decode(
                "volume header does not decrypt with this key".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl EngineBackend for MemoryBackend {
    type Engine = MemoryEngine;

    fn detect_sector_size(
        &self,
        _device: &Path,
        key: &DeviceKey,
    ) -> Result<SectorSize, EngineError> {
        self.record(Probe::SectorSize);
        self.check_key(key)?;
        Ok(self.geometry.sector_size)
    }

    fn detect_sectors_count(
        &self,
        _device: &Path,
        key: &DeviceKey,
        sector_size: SectorSize,
    ) -> Result<u64, EngineError> {
        self.record(Probe::SectorsCount);
        self.check_key(key)?;
        Ok(self.geometry.total_bytes() >> sector_size.log2())
    }

    fn open(
        &self,
        _device: &Path,
        key: &DeviceKey,
        _geometry: Geometry,
    ) -> Result<MemoryEngine, EngineError> {
        self.record(Probe::Open);
        self.check_key(key)?;
        Ok(self.engine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine
            .insert_file("/sys/title/code.rpx", &b"payload"[..])
            .insert_dir("/usr/empty")
            .insert_link("/usr/link");
        engine
    }

    #[test]
    fn resolves_typed_objects() {
        let engine = sample();
        let root = engine.resolve("/").unwrap().unwrap();
        assert_eq!(root.as_directory().map(|d| d.child_count), Some(2));

        let file = engine.resolve("/sys/title/code.rpx").unwrap().unwrap();
        assert_eq!(file.as_file().map(|f| f.size), Some(7));
        assert_eq!(file.name(), "code.rpx");

        assert!(engine.resolve("/usr/link").unwrap().unwrap().is_link());
        assert!(engine.resolve("/missing").unwrap().is_none());
        assert!(engine.resolve_directory("/usr/link").unwrap().is_none());
    }

    #[test]
    fn children_keep_insertion_order_and_restart() {
        let engine = MemoryEngine::new();
        engine
            .insert_file("/z", &b""[..])
            .insert_dir("/a")
            .insert_file("/m", &b""[..]);
        let root = engine.resolve_directory("/").unwrap().unwrap();
        let names = |engine: &MemoryEngine| -> Vec<String> {
            engine
                .children(&root)
                .unwrap()
                .map(|e| e.unwrap().name().to_string())
                .collect()
        };
        assert_eq!(names(&engine), ["z", "a", "m"]);
        assert_eq!(names(&engine), ["z", "a", "m"]);
    }

    #[test]
    fn streams_are_seekable() {
        let engine = sample();
        let file = engine
            .resolve("/sys/title/code.rpx")
            .unwrap()
            .and_then(Entry::into_file)
            .unwrap();
        let mut stream = engine.open_stream(&file).unwrap();
        stream.seek(SeekFrom::Start(3)).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"load");
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn injected_faults() {
        let engine = MemoryEngine::new();
        engine
            .insert_faulty_file("/open", &b"abc"[..], ReadFault::Open)
            .insert_faulty_file("/read", &b"abcdef"[..], ReadFault::ReadError { after: 2 })
            .poison("/bad");
        engine.insert_dir("/bad");

        let open = engine.resolve("/open").unwrap().and_then(Entry::into_file).unwrap();
        assert!(engine.open_stream(&open).is_err());

        let read = engine.resolve("/read").unwrap().and_then(Entry::into_file).unwrap();
        let mut stream = engine.open_stream(&read).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert!(stream.read(&mut buf).is_err());

        assert!(engine.resolve("/bad").is_err());
        let root = engine.resolve_directory("/").unwrap().unwrap();
        let results: Vec<_> = engine.children(&root).unwrap().collect();
        assert_eq!(results.len(), 3);
        assert!(results[2].is_err());
    }
}
