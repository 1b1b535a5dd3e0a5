//! Bulk extraction of a volume into a host directory tree.
//!
//! The walk is depth-first in engine order. Failures below the top level
//! are logged and only abandon the affected directory or file; everything
//! else is still extracted. Links are skipped.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use wfs_core::{Children, DirectoryEntry, Engine, EngineError, Entry, FileEntry, engine_path};

/// Size of each read while copying a file out.
pub const CHUNK_SIZE: usize = 8192;

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("source path {0} not found")]
    SourceNotFound(String),

    #[error("failed to resolve source path {path}: {source}")]
    Engine {
        path: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to create output directory {}: {source}", path.display())]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Debug)]
pub struct ExtractOptions {
    /// Engine path to start from.
    pub source: String,
    /// Host directory the tree is mirrored into.
    pub output: PathBuf,
    /// Print every destination path before it is processed.
    pub verbose: bool,
}

impl ExtractOptions {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            source: "/".to_string(),
            output: output.into(),
            verbose: false,
        }
    }
}

/// What a run did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub directories: u64,
    pub files: u64,
    pub bytes: u64,
    pub links_skipped: u64,
    /// Directories and files abandoned after an error.
    pub failures: u64,
}

/// Extracts `options.source` from `engine` into `options.output`.
///
/// Verbose listings go to `out`. The source is resolved before anything is
/// written, so a missing source leaves the host untouched.
pub fn extract<E, W>(
    engine: &E,
    options: &ExtractOptions,
    out: W,
) -> Result<ExtractReport, ExtractError>
where
    E: Engine,
    W: Write,
{
    let source = engine_path::normalize(&options.source);
    let root = match engine.resolve_directory(&source) {
        Ok(Some(dir)) => dir,
        Ok(None) => return Err(ExtractError::SourceNotFound(source)),
        Err(e) => {
            return Err(ExtractError::Engine {
                path: source,
                source: e,
            });
        }
    };

    fs::create_dir_all(&options.output).map_err(|e| ExtractError::CreateRoot {
        path: options.output.clone(),
        source: e,
    })?;

    info!(
        "extracting {} into {}",
        root.path,
        options.output.display()
    );
    let mut extractor = Extractor {
        engine,
        root: &options.output,
        verbose: options.verbose,
        out,
        report: ExtractReport::default(),
    };
    extractor.run(root);

    let report = extractor.report;
    if report.failures > 0 {
        warn!(
            "extraction finished with {} failed entries",
            report.failures
        );
    }
    info!(
        "extracted {} files ({} bytes) in {} directories, skipped {} links",
        report.files, report.bytes, report.directories, report.links_skipped
    );
    Ok(report)
}

struct Frame<'e> {
    dest: PathBuf,
    children: Children<'e>,
}

struct Extractor<'e, 'o, E, W> {
    engine: &'e E,
    root: &'o Path,
    verbose: bool,
    out: W,
    report: ExtractReport,
}

impl<'e, E: Engine, W: Write> Extractor<'e, '_, E, W> {
    fn run(&mut self, root: DirectoryEntry) {
        let mut stack: Vec<Frame<'e>> = Vec::new();
        if let Some(frame) = self.enter(&root, self.root.to_path_buf()) {
            stack.push(frame);
        }

        while let Some(frame) = stack.last_mut() {
            let child = match frame.children.next() {
                None => {
                    stack.pop();
                    continue;
                }
                Some(Ok(child)) => child,
                Some(Err(e)) => {
                    error!(
                        "failed to read an entry below {}: {e}",
                        frame.dest.display()
                    );
                    self.report.failures += 1;
                    continue;
                }
            };
            let dest = frame.dest.join(child.name());
            self.announce(&dest);

            match child {
                Entry::Directory(dir) => {
                    if let Some(frame) = self.enter(&dir, dest) {
                        self.report.directories += 1;
                        stack.push(frame);
                    }
                }
                Entry::File(file) => self.dump_file(&file, &dest),
                Entry::Link(link) => {
                    debug!("skipping link {}", link.path);
                    self.report.links_skipped += 1;
                }
            }
        }
    }

    /// Creates `dest` if needed and starts listing `dir`.
    fn enter(&mut self, dir: &DirectoryEntry, dest: PathBuf) -> Option<Frame<'e>> {
        if !dest.is_dir()
            && let Err(e) = fs::create_dir(&dest)
        {
            error!("failed to create directory {}: {e}", dest.display());
            self.report.failures += 1;
            return None;
        }
        let engine: &'e E = self.engine;
        match engine.children(dir) {
            Ok(children) => Some(Frame { dest, children }),
            Err(e) => {
                error!("failed to list {}: {e}", dir.path);
                self.report.failures += 1;
                None
            }
        }
    }

    fn announce(&mut self, dest: &Path) {
        if !self.verbose {
            return;
        }
        let rel = dest.strip_prefix(self.root).unwrap_or(dest);
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if let Err(e) = writeln!(self.out, "dumping /{rel}") {
            debug!("failed to write progress line: {e}");
        }
    }

    fn dump_file(&mut self, file: &FileEntry, dest: &Path) {
        match self.copy_file(file, dest) {
            Ok(()) => {
                self.report.files += 1;
                self.report.bytes += file.size;
            }
            Err(e) => {
                error!("failed to dump {}: {e}", file.path);
                self.report.failures += 1;
            }
        }
    }

    /// Streams `file` into `dest` in [`CHUNK_SIZE`] reads.
    fn copy_file(&self, file: &FileEntry, dest: &Path) -> io::Result<()> {
        let mut output = File::create(dest)?;
        let mut stream = self
            .engine
            .open_stream(file)
            .map_err(|e| io::Error::other(e.to_string()))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut remaining = file.size;
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let n = match stream.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!(
                            "stream ended with {remaining} of {} bytes left",
                            file.size
                        ),
                    ));
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            output.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        output.flush()
    }
}
