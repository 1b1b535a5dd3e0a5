//! # WFS core
//!
//! Everything needed to get from two hardware key files to an opened,
//! keyed filesystem engine.
//!
//! ## Layers
//! 1. `keys`    – fixed-size secret blobs (`otp.bin`, `seeprom.bin`).
//! 2. `derive`  – storage medium selection and volume key derivation.
//! 3. `engine`  – the contract an on-disk filesystem engine fulfils.
//! 4. `context` – geometry probe + opened engine, owned by the front end.
//!
//! Block decoding, metadata parsing and payload decryption live behind the
//! [`Engine`] / [`EngineBackend`] traits and are never done here.

pub mod context;
pub mod derive;
pub mod engine;
mod error;
pub mod keys;

pub use context::{Geometry, MountContext, SectorSizeChoice, open_volume};
pub use derive::{DeviceKey, KeyOptions, Medium, MediumSelection, derive_device_key};
pub use engine::{
    Children, DirectoryEntry, Engine, EngineBackend, Entry, EntryKind, FileEntry, LinkEntry,
    SectorSize, SeekableReader, engine_path,
};
pub use error::{DeriveError, EngineError, KeyError, OpenError, ValidationError};
pub use keys::{DEVICE_BLOB_SIZE, DeviceBlob, KeyFile, SEED_BLOB_SIZE, SeedBlob};
