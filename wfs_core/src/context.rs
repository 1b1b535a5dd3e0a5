//! The opened volume shared by every adapter call.

use std::path::Path;

use tracing::info;

use crate::derive::{DeviceKey, KeyOptions};
use crate::engine::{Engine, EngineBackend, SectorSize};
use crate::error::{EngineError, OpenError};

/// Probed device geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub sector_size: SectorSize,
    pub sectors_count: u64,
}

impl Geometry {
    pub fn total_bytes(&self) -> u64 {
        self.sectors_count << self.sector_size.log2()
    }
}

/// How the sector size is obtained before the engine is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SectorSizeChoice {
    /// Ask the backend to probe the device.
    #[default]
    Detect,
    /// Use a size given on the command line.
    Fixed(SectorSize),
}

/// A keyed, opened engine plus the geometry it was opened with.
///
/// Built once per process after key derivation, then shared read-only
/// (usually behind an `Arc`) until shutdown. It is never reopened.
#[derive(Debug)]
pub struct MountContext<E> {
    engine: E,
    geometry: Geometry,
}

impl<E: Engine> MountContext<E> {
    /// Probes the device geometry and opens the engine.
    pub fn establish<B>(
        backend: &B,
        device: &Path,
        key: &DeviceKey,
        sector_size: SectorSizeChoice,
    ) -> Result<Self, EngineError>
    where
        B: EngineBackend<Engine = E>,
    {
        let sector_size = match sector_size {
            SectorSizeChoice::Detect => backend.detect_sector_size(device, key)?,
            SectorSizeChoice::Fixed(size) => size,
        };
        let sectors_count = backend.detect_sectors_count(device, key, sector_size)?;
        let geometry = Geometry {
            sector_size,
            sectors_count,
        };
        info!(
            "{}: {} sectors of {} bytes",
            device.display(),
            sectors_count,
            sector_size
        );
        let engine = backend.open(device, key, geometry)?;
        Ok(Self { engine, geometry })
    }

    /// Wraps an engine that was opened elsewhere.
    pub fn from_engine(engine: E, geometry: Geometry) -> Self {
        Self { engine, geometry }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }
}

/// Full startup pipeline shared by the front ends: validate the medium
/// flags, load the key files, derive the key, probe and open the device.
///
/// Nothing touches `device` unless every key step succeeded.
pub fn open_volume<B: EngineBackend>(
    backend: &B,
    device: &Path,
    keys: &KeyOptions,
    sector_size: SectorSizeChoice,
) -> Result<MountContext<B::Engine>, OpenError> {
    let (_medium, key) = keys.derive_key()?;
    Ok(MountContext::establish(backend, device, &key, sector_size)?)
}
