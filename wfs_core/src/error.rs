use std::path::PathBuf;

/// Failure to load a fixed-size key file.
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("failed to read key file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key file {} has the wrong size: expected {expected} bytes, got {actual}", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
}

/// Conflicting or missing storage medium options.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("--mlc and --usb are mutually exclusive")]
    MediumConflict,

    #[error("exactly one of --mlc or --usb must be given")]
    NoMedium,

    #[error("--seeprom is required for usb devices")]
    MissingSeed,
}

#[derive(thiserror::Error, Debug)]
pub enum DeriveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Errors reported by a filesystem engine or its backend.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("volume decode failed: {0}")]
    Decode(String),

    #[error("unsupported sector size: {0} bytes")]
    UnsupportedSectorSize(u32),
}

/// Failure while going from key files to an opened engine.
#[derive(thiserror::Error, Debug)]
pub enum OpenError {
    #[error(transparent)]
    Derive(#[from] DeriveError),

    #[error("failed to open volume: {0}")]
    Engine(#[from] EngineError),
}

impl OpenError {
    /// The validation failure, if option checking is what went wrong.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            OpenError::Derive(DeriveError::Validation(v)) => Some(v),
            _ => None,
        }
    }
}
