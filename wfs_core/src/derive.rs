//! Volume key derivation.
//!
//! The internal MLC volume is keyed directly from the OTP. The USB volume key
//! is one AES-128 block encryption of the SEEPROM seed under a second OTP
//! key: raw ECB on exactly one block, no IV and no padding.

use std::fmt;
use std::path::PathBuf;

use aes::Aes128;
use aes::Block;
use aes::cipher::{BlockEncrypt, KeyInit};
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DeriveError, ValidationError};
use crate::keys::{DeviceBlob, KEY_FIELD_LEN, SeedBlob};

/// Storage medium holding the volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Medium {
    /// Internal eMMC ("MLC") storage.
    Mlc,
    /// Removable USB storage.
    Usb,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Medium::Mlc => f.write_str("mlc"),
            Medium::Usb => f.write_str("usb"),
        }
    }
}

/// The raw `--mlc` / `--usb` flags as given on a command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MediumSelection {
    pub mlc: bool,
    pub usb: bool,
}

impl MediumSelection {
    pub fn mlc() -> Self {
        Self {
            mlc: true,
            usb: false,
        }
    }

    pub fn usb() -> Self {
        Self {
            mlc: false,
            usb: true,
        }
    }

    /// Picks the medium; exactly one flag must be set, and USB needs a seed blob.
    pub fn resolve(self, seed_given: bool) -> Result<Medium, ValidationError> {
        let medium = match (self.mlc, self.usb) {
            (true, true) => return Err(ValidationError::MediumConflict),
            (false, false) => return Err(ValidationError::NoMedium),
            (true, false) => Medium::Mlc,
            (false, true) => Medium::Usb,
        };
        if medium == Medium::Usb && !seed_given {
            return Err(ValidationError::MissingSeed);
        }
        Ok(medium)
    }
}

/// The 16-byte volume key handed to the filesystem engine.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey([u8; KEY_FIELD_LEN]);

impl DeviceKey {
    pub fn new(mut bytes: [u8; KEY_FIELD_LEN]) -> Self {
        Self::take(&mut bytes)
    }

    /// Copies `bytes` into a key and wipes the source.
    pub fn take(bytes: &mut [u8; KEY_FIELD_LEN]) -> Self {
        let key = Self(*bytes);
        bytes.zeroize();
        key
    }

    pub fn as_bytes(&self) -> &[u8; KEY_FIELD_LEN] {
        &self.0
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey(..)")
    }
}

/// Computes the volume key for `medium`.
///
/// Pure function of its inputs. A USB derivation without a seed blob is a
/// [`ValidationError::MissingSeed`].
pub fn derive_device_key(
    medium: Medium,
    device: &DeviceBlob,
    seed: Option<&SeedBlob>,
) -> Result<DeviceKey, ValidationError> {
    match medium {
        Medium::Mlc => {
            let mut raw = device.mlc_key();
            Ok(DeviceKey::take(&mut raw))
        }
        Medium::Usb => {
            let seed = seed.ok_or(ValidationError::MissingSeed)?;
            Ok(usb_device_key(device, seed))
        }
    }
}

fn usb_device_key(device: &DeviceBlob, seed: &SeedBlob) -> DeviceKey {
    let mut cipher_key = device.usb_seed_encryption_key();
    let mut plain = seed.usb_key_seed();
    let cipher = Aes128::new(&cipher_key.into());
    cipher_key.zeroize();

    let mut block = Block::from(plain);
    plain.zeroize();
    cipher.encrypt_block(&mut block);

    let mut out = [0u8; KEY_FIELD_LEN];
    out.copy_from_slice(&block);
    block.as_mut_slice().zeroize();
    DeviceKey::take(&mut out)
}

/// Key-related front-end options, independent of any argument parser.
#[derive(Clone, Debug)]
pub struct KeyOptions {
    /// Path to `otp.bin`.
    pub otp: PathBuf,
    /// Path to `seeprom.bin`; required for USB.
    pub seeprom: Option<PathBuf>,
    pub medium: MediumSelection,
}

impl KeyOptions {
    /// Checks the medium flags without touching the filesystem.
    pub fn validate(&self) -> Result<Medium, ValidationError> {
        self.medium.resolve(self.seeprom.is_some())
    }

    /// Validates, loads the required blobs and derives the volume key.
    ///
    /// Validation happens before any file is opened.
    pub fn derive_key(&self) -> Result<(Medium, DeviceKey), DeriveError> {
        let medium = self.validate()?;
        let device = DeviceBlob::load(&self.otp)?;
        let seed = match (medium, &self.seeprom) {
            (Medium::Usb, Some(path)) => Some(SeedBlob::load(path)?),
            (Medium::Mlc, Some(path)) => {
                warn!("ignoring seeprom {} for an mlc device", path.display());
                None
            }
            _ => None,
        };
        let key = derive_device_key(medium, &device, seed.as_ref())?;
        info!("derived {medium} device key");
        Ok((medium, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{DEVICE_BLOB_SIZE, SEED_BLOB_SIZE};

    const FIPS_KEY: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
        0x0f,
    ];
    const FIPS_PLAIN: [u8; 16] = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xff,
    ];
    const FIPS_CIPHER: [u8; 16] = [
        0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70, 0xb4, 0xc5,
        0x5a,
    ];

    fn otp_with(seed_key: [u8; 16], mlc_key: [u8; 16]) -> [u8; DEVICE_BLOB_SIZE] {
        let mut otp = [0u8; DEVICE_BLOB_SIZE];
        otp[0x130..0x140].copy_from_slice(&seed_key);
        otp[0x180..0x190].copy_from_slice(&mlc_key);
        otp
    }

    fn seeprom_with(seed: [u8; 16]) -> [u8; SEED_BLOB_SIZE] {
        let mut seeprom = [0u8; SEED_BLOB_SIZE];
        seeprom[0xB0..0xC0].copy_from_slice(&seed);
        seeprom
    }

    #[test]
    fn medium_flags_must_be_exclusive() {
        let both = MediumSelection {
            mlc: true,
            usb: true,
        };
        assert_eq!(both.resolve(true), Err(ValidationError::MediumConflict));
        assert_eq!(
            MediumSelection::default().resolve(true),
            Err(ValidationError::NoMedium)
        );
        assert_eq!(MediumSelection::mlc().resolve(false), Ok(Medium::Mlc));
        assert_eq!(MediumSelection::usb().resolve(true), Ok(Medium::Usb));
        assert_eq!(
            MediumSelection::usb().resolve(false),
            Err(ValidationError::MissingSeed)
        );
    }

    #[test]
    fn mlc_key_is_taken_verbatim() {
        let device = DeviceBlob::from_array(otp_with([1; 16], [7; 16]));
        let key = derive_device_key(Medium::Mlc, &device, None).unwrap();
        assert_eq!(key.as_bytes(), &[7; 16]);
    }

    #[test]
    fn usb_key_is_single_block_aes_ecb() {
        let device = DeviceBlob::from_array(otp_with(FIPS_KEY, [0; 16]));
        let seed = SeedBlob::from_array(seeprom_with(FIPS_PLAIN));
        let key = derive_device_key(Medium::Usb, &device, Some(&seed)).unwrap();
        assert_eq!(key.as_bytes(), &FIPS_CIPHER);
    }

    #[test]
    fn usb_without_seed_blob_is_rejected() {
        let device = DeviceBlob::from_array(otp_with(FIPS_KEY, [0; 16]));
        assert_eq!(
            derive_device_key(Medium::Usb, &device, None),
            Err(ValidationError::MissingSeed)
        );
    }

    #[test]
    fn usb_derivation_is_deterministic() {
        let device = DeviceBlob::from_array(otp_with([0x3c; 16], [0; 16]));
        let seed = SeedBlob::from_array(seeprom_with([0xa5; 16]));
        let first = derive_device_key(Medium::Usb, &device, Some(&seed)).unwrap();
        let second = derive_device_key(Medium::Usb, &device, Some(&seed)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn single_bit_flips_change_the_usb_key() {
        let otp = otp_with(FIPS_KEY, [0; 16]);
        let seeprom = seeprom_with(FIPS_PLAIN);
        let baseline = derive_device_key(
            Medium::Usb,
            &DeviceBlob::from_array(otp),
            Some(&SeedBlob::from_array(seeprom)),
        )
        .unwrap();

        for bit in 0..128 {
            let mut flipped = otp;
            flipped[0x130 + bit / 8] ^= 1 << (bit % 8);
            let key = derive_device_key(
                Medium::Usb,
                &DeviceBlob::from_array(flipped),
                Some(&SeedBlob::from_array(seeprom)),
            )
            .unwrap();
            assert_ne!(key, baseline, "otp bit {bit} did not affect the key");

            let mut flipped = seeprom;
            flipped[0xB0 + bit / 8] ^= 1 << (bit % 8);
            let key = derive_device_key(
                Medium::Usb,
                &DeviceBlob::from_array(otp),
                Some(&SeedBlob::from_array(flipped)),
            )
            .unwrap();
            assert_ne!(key, baseline, "seeprom bit {bit} did not affect the key");
        }
    }

    #[test]
    fn taking_a_key_wipes_the_source() {
        let mut raw = [0x3Cu8; 16];
        let key = DeviceKey::take(&mut raw);
        assert_eq!(raw, [0; 16]);
        assert_eq!(key.as_bytes(), &[0x3C; 16]);
    }

    #[test]
    fn device_key_debug_is_redacted() {
        let key = DeviceKey::new([0xEE; 16]);
        assert_eq!(format!("{key:?}"), "DeviceKey(..)");
    }
}
