//! Fixed-size hardware key files.
//!
//! Two blobs are dumped from a console: the device-unique OTP area
//! (`otp.bin`, 1024 bytes) and the SEEPROM (`seeprom.bin`, 512 bytes). Both
//! are read whole and validated by length only; the key material is pulled
//! out of fixed offsets.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use zeroize::Zeroize;

use crate::error::KeyError;

/// Size of the device-unique blob (`otp.bin`).
pub const DEVICE_BLOB_SIZE: usize = 1024;
/// Size of the seed blob (`seeprom.bin`).
pub const SEED_BLOB_SIZE: usize = 512;

/// Length of every key field stored in a blob.
pub const KEY_FIELD_LEN: usize = 16;

const MLC_KEY_OFFSET: usize = 0x180;
const USB_SEED_ENCRYPTION_KEY_OFFSET: usize = 0x130;
const USB_KEY_SEED_OFFSET: usize = 0xB0;

const _: () = assert!(MLC_KEY_OFFSET + KEY_FIELD_LEN <= DEVICE_BLOB_SIZE);
const _: () = assert!(USB_SEED_ENCRYPTION_KEY_OFFSET + KEY_FIELD_LEN <= DEVICE_BLOB_SIZE);
const _: () = assert!(USB_KEY_SEED_OFFSET + KEY_FIELD_LEN <= SEED_BLOB_SIZE);

/// An immutable key file of exactly `N` bytes.
///
/// The length is part of the type, so a `KeyFile<N>` can only exist once
/// `N` bytes were actually read. Contents are wiped on drop.
pub struct KeyFile<const N: usize> {
    data: Box<[u8; N]>,
}

/// The device-unique blob: source of the MLC key and the USB seed-encryption key.
pub type DeviceBlob = KeyFile<DEVICE_BLOB_SIZE>;
/// The seed blob: source of the USB key seed.
pub type SeedBlob = KeyFile<SEED_BLOB_SIZE>;

impl<const N: usize> KeyFile<N> {
    /// Reads a key file that must be exactly `N` bytes long.
    ///
    /// Short files and files with trailing data are both rejected with
    /// [`KeyError::SizeMismatch`]; nothing partial is ever returned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let io_err = |source| KeyError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(io_err)?;
        // One extra byte is enough to tell an oversized file apart.
        let mut buf = Vec::with_capacity(N + 1);
        (&mut file)
            .take(N as u64 + 1)
            .read_to_end(&mut buf)
            .map_err(io_err)?;

        let result = Self::from_bytes(&buf).ok_or_else(|| {
            let actual = if buf.len() > N {
                file.metadata()
                    .map(|m| m.len() as usize)
                    .unwrap_or(buf.len())
            } else {
                buf.len()
            };
            KeyError::SizeMismatch {
                path: path.to_path_buf(),
                expected: N,
                actual,
            }
        });
        buf.zeroize();
        let blob = result?;
        tracing::debug!("loaded {N}-byte key file {}", path.display());
        Ok(blob)
    }

    /// Copies `bytes` into a key file if it is exactly `N` bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != N {
            return None;
        }
        let mut data = Box::new([0u8; N]);
        data.copy_from_slice(bytes);
        Some(Self { data })
    }

    pub fn from_array(mut data: [u8; N]) -> Self {
        Self::take(&mut data)
    }

    /// Moves `data` into a key file and wipes the source.
    pub fn take(data: &mut [u8; N]) -> Self {
        let mut boxed = Box::new([0u8; N]);
        boxed.copy_from_slice(data);
        data.zeroize();
        Self { data: boxed }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    fn field(&self, offset: usize) -> [u8; KEY_FIELD_LEN] {
        let mut out = [0u8; KEY_FIELD_LEN];
        out.copy_from_slice(&self.data[offset..offset + KEY_FIELD_LEN]);
        out
    }
}

impl KeyFile<DEVICE_BLOB_SIZE> {
    /// Volume key of the internal MLC storage, used as-is.
    pub fn mlc_key(&self) -> [u8; KEY_FIELD_LEN] {
        self.field(MLC_KEY_OFFSET)
    }

    /// AES key that turns the SEEPROM seed into the USB volume key.
    pub fn usb_seed_encryption_key(&self) -> [u8; KEY_FIELD_LEN] {
        self.field(USB_SEED_ENCRYPTION_KEY_OFFSET)
    }
}

impl KeyFile<SEED_BLOB_SIZE> {
    /// Per-console seed for the USB volume key.
    pub fn usb_key_seed(&self) -> [u8; KEY_FIELD_LEN] {
        self.field(USB_KEY_SEED_OFFSET)
    }
}

impl<const N: usize> Drop for KeyFile<N> {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl<const N: usize> fmt::Debug for KeyFile<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFile")
            .field("len", &N)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn device_blob_loads_only_at_exact_size() {
        let ok = write_file(DEVICE_BLOB_SIZE);
        let blob = DeviceBlob::load(ok.path()).unwrap();
        assert_eq!(blob.len(), DEVICE_BLOB_SIZE);

        for len in [0, 1023, 1025, 2048] {
            let file = write_file(len);
            match DeviceBlob::load(file.path()) {
                Err(KeyError::SizeMismatch {
                    expected, actual, ..
                }) => {
                    assert_eq!(expected, DEVICE_BLOB_SIZE);
                    assert_eq!(actual, len);
                }
                other => panic!("expected size mismatch for {len} bytes, got {other:?}"),
            }
        }
    }

    #[test]
    fn seed_blob_loads_only_at_exact_size() {
        let ok = write_file(SEED_BLOB_SIZE);
        assert!(SeedBlob::load(ok.path()).is_ok());

        let short = write_file(SEED_BLOB_SIZE - 1);
        assert!(matches!(
            SeedBlob::load(short.path()),
            Err(KeyError::SizeMismatch { actual: 511, .. })
        ));

        let device_sized = write_file(DEVICE_BLOB_SIZE);
        assert!(matches!(
            SeedBlob::load(device_sized.path()),
            Err(KeyError::SizeMismatch { actual: 1024, .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DeviceBlob::load(dir.path().join("otp.bin")).unwrap_err();
        assert!(matches!(err, KeyError::Io { .. }));
    }

    #[test]
    fn fields_come_from_fixed_offsets() {
        let mut otp = [0u8; DEVICE_BLOB_SIZE];
        otp[0x180..0x190].copy_from_slice(&[0xAA; 16]);
        otp[0x130..0x140].copy_from_slice(&[0x55; 16]);
        otp[0x190] = 0xFF;
        let otp = DeviceBlob::from_array(otp);
        assert_eq!(otp.mlc_key(), [0xAA; 16]);
        assert_eq!(otp.usb_seed_encryption_key(), [0x55; 16]);

        let mut seeprom = [0u8; SEED_BLOB_SIZE];
        for (i, b) in seeprom[0xB0..0xC0].iter_mut().enumerate() {
            *b = i as u8;
        }
        let seeprom = SeedBlob::from_array(seeprom);
        let expected: Vec<u8> = (0..16).collect();
        assert_eq!(seeprom.usb_key_seed().as_slice(), expected.as_slice());
    }

    #[test]
    fn from_bytes_checks_length() {
        assert!(SeedBlob::from_bytes(&[0u8; SEED_BLOB_SIZE]).is_some());
        assert!(SeedBlob::from_bytes(&[0u8; SEED_BLOB_SIZE + 1]).is_none());
        assert!(DeviceBlob::from_bytes(&[]).is_none());
    }

    #[test]
    fn debug_output_hides_contents() {
        let blob = SeedBlob::from_array([0x42; SEED_BLOB_SIZE]);
        let dbg = format!("{blob:?}");
        assert!(!dbg.contains("66"));
        assert!(dbg.contains("512"));
    }

    #[test]
    fn take_wipes_the_source() {
        let mut raw = [0x5Au8; SEED_BLOB_SIZE];
        let blob = SeedBlob::take(&mut raw);
        assert!(raw.iter().all(|&b| b == 0));
        assert!(blob.as_bytes().iter().all(|&b| b == 0x5A));
    }
}
