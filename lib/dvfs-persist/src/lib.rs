//! CRC-checked flash persistence for the selected governor name and the
//! adaptive governor's tunable parameter blob.
//!
//! Both records live inside a single reserved erase-sector so they can be
//! read-modify-written together. Flash access is abstracted behind
//! [`FlashDevice`] so the record format and CRC logic are host-testable
//! against an in-memory fake sector; only `drv/rp2040-platform` implements
//! the trait against real hardware.
#![cfg_attr(not(test), no_std)]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Offset of the reserved persistence sector within the flash device's
/// address space.
pub const FLASH_OFFSET: u32 = 0x1F_0000;
/// Size of the reserved erase-sector. Both records below must fit inside it.
pub const SECTOR_SIZE: usize = 0x1_0000;
/// Offset of the tuning-blob record within the sector.
pub const TUNING_OFFSET: usize = 0x100;

const GOVERNOR_MAGIC: u32 = 0x4756_4F47;
const GOVERNOR_VERSION: u32 = 1;
const TUNING_MAGIC: u32 = 0x5250_5050;

/// Longest governor name that can be stored (the on-disk field is 56 bytes,
/// one of which is implicitly available for a NUL terminator).
pub const MAX_NAME_LEN: usize = 55;
/// Largest tunable-parameter payload that can be stored.
pub const MAX_TUNING_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistError {
    /// The underlying flash device reported an I/O failure.
    Flash,
    /// No valid record was present (magic/CRC mismatch, or never written).
    NotPresent,
    /// The caller's name exceeds [`MAX_NAME_LEN`].
    NameTooLong,
    /// The caller's payload exceeds [`MAX_TUNING_LEN`].
    TuningTooLarge,
}

/// A CRC-checkable flash device, erased and programmed one sector at a time.
///
/// Implementations are expected to mask interrupts and hold the sibling core
/// off for the duration of `erase_sector`/`program`, per the cross-core
/// lockout requirement on flash writes.
pub trait FlashDevice {
    type Error;

    /// Read `buf.len()` bytes starting at `offset` (XIP-readable at any time
    /// the sector isn't mid-erase/program).
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Erase the sector containing `offset`. `offset` is always sector-aligned
    /// for calls made by this crate.
    fn erase_sector(&mut self, offset: u32) -> Result<(), Self::Error>;

    /// Program previously-erased flash. `data.len()` is always a whole
    /// sector for calls made by this crate.
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error>;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct GovernorRecord {
    magic: u32,
    version: u32,
    name: [u8; 56],
    crc: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct TuningRecord {
    magic: u32,
    length: u32,
    payload: [u8; MAX_TUNING_LEN],
    crc: u32,
}

/// The original kernel's bespoke non-cryptographic mixing function: a
/// multiplicative-shift CRC seeded away from zero so an all-zero erased
/// sector never validates.
fn simple_crc(bytes: &[u8]) -> u32 {
    let mut crc: u32 = 0xA5A5_A5A5;
    for &b in bytes {
        crc = (crc << 7) ^ u32::from(b);
    }
    crc
}

/// Save the selected governor's name into the reserved sector.
///
/// Performs a read-modify-write of the whole sector (so the tuning blob at
/// [`TUNING_OFFSET`] survives) via `scratch`, which must be exactly
/// [`SECTOR_SIZE`] bytes.
pub fn save_governor_name<F: FlashDevice>(
    flash: &mut F,
    scratch: &mut [u8; SECTOR_SIZE],
    name: &str,
) -> Result<(), PersistError> {
    if name.len() > MAX_NAME_LEN {
        return Err(PersistError::NameTooLong);
    }

    flash
        .read(FLASH_OFFSET, scratch.as_mut_slice())
        .map_err(|_| PersistError::Flash)?;

    let mut name_bytes = [0u8; 56];
    name_bytes[..name.len()].copy_from_slice(name.as_bytes());

    let mut rec = GovernorRecord {
        magic: GOVERNOR_MAGIC,
        version: GOVERNOR_VERSION,
        name: name_bytes,
        crc: 0,
    };
    rec.crc = simple_crc(&rec.as_bytes()[..core::mem::size_of::<GovernorRecord>() - 4]);

    scratch[..core::mem::size_of::<GovernorRecord>()].copy_from_slice(rec.as_bytes());

    write_sector(flash, scratch)
}

/// Load the previously-saved governor name, if the record validates.
///
/// Returns the name's byte length on success; `out` must be at least
/// [`MAX_NAME_LEN`] + 1 bytes.
pub fn load_governor_name<F: FlashDevice>(
    flash: &mut F,
    out: &mut [u8],
) -> Result<usize, PersistError> {
    let mut header = [0u8; core::mem::size_of::<GovernorRecord>()];
    flash
        .read(FLASH_OFFSET, &mut header)
        .map_err(|_| PersistError::Flash)?;

    let rec = GovernorRecord::read_from_bytes(&header).map_err(|_| PersistError::NotPresent)?;
    if rec.magic != GOVERNOR_MAGIC {
        return Err(PersistError::NotPresent);
    }
    let expected = simple_crc(&header[..header.len() - 4]);
    if expected != rec.crc {
        return Err(PersistError::NotPresent);
    }

    let len = rec
        .name
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(rec.name.len());
    if out.len() < len {
        return Err(PersistError::NameTooLong);
    }
    out[..len].copy_from_slice(&rec.name[..len]);
    Ok(len)
}

/// Save the adaptive governor's tunable parameter blob.
pub fn save_tuning<F: FlashDevice>(
    flash: &mut F,
    scratch: &mut [u8; SECTOR_SIZE],
    payload: &[u8],
) -> Result<(), PersistError> {
    if payload.len() > MAX_TUNING_LEN {
        return Err(PersistError::TuningTooLarge);
    }

    flash
        .read(FLASH_OFFSET, scratch.as_mut_slice())
        .map_err(|_| PersistError::Flash)?;

    let mut payload_bytes = [0u8; MAX_TUNING_LEN];
    payload_bytes[..payload.len()].copy_from_slice(payload);

    let mut rec = TuningRecord {
        magic: TUNING_MAGIC,
        length: payload.len() as u32,
        payload: payload_bytes,
        crc: 0,
    };
    rec.crc = simple_crc(&rec.as_bytes()[..core::mem::size_of::<TuningRecord>() - 4]);

    let start = TUNING_OFFSET;
    let end = start + core::mem::size_of::<TuningRecord>();
    scratch[start..end].copy_from_slice(rec.as_bytes());

    write_sector(flash, scratch)
}

/// Load the adaptive governor's tunable parameter blob, if present.
///
/// Returns the payload's byte length on success.
pub fn load_tuning<F: FlashDevice>(
    flash: &mut F,
    out: &mut [u8],
) -> Result<usize, PersistError> {
    let mut header = [0u8; core::mem::size_of::<TuningRecord>()];
    flash
        .read(FLASH_OFFSET + TUNING_OFFSET as u32, &mut header)
        .map_err(|_| PersistError::Flash)?;

    let rec = TuningRecord::read_from_bytes(&header).map_err(|_| PersistError::NotPresent)?;
    if rec.magic != TUNING_MAGIC {
        return Err(PersistError::NotPresent);
    }
    let expected = simple_crc(&header[..header.len() - 4]);
    if expected != rec.crc {
        return Err(PersistError::NotPresent);
    }

    let len = rec.length as usize;
    if len > MAX_TUNING_LEN || out.len() < len {
        return Err(PersistError::TuningTooLarge);
    }
    out[..len].copy_from_slice(&rec.payload[..len]);
    Ok(len)
}

fn write_sector<F: FlashDevice>(
    flash: &mut F,
    scratch: &[u8; SECTOR_SIZE],
) -> Result<(), PersistError> {
    flash
        .erase_sector(FLASH_OFFSET)
        .map_err(|_| PersistError::Flash)?;
    flash
        .program(FLASH_OFFSET, scratch)
        .map_err(|_| PersistError::Flash)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFlash {
        sector: [u8; SECTOR_SIZE],
    }

    impl FakeFlash {
        fn erased() -> Self {
            Self {
                sector: [0xFF; SECTOR_SIZE],
            }
        }
    }

    impl FlashDevice for FakeFlash {
        type Error = ();

        fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), ()> {
            let offset = (offset - FLASH_OFFSET) as usize;
            buf.copy_from_slice(&self.sector[offset..offset + buf.len()]);
            Ok(())
        }

        fn erase_sector(&mut self, offset: u32) -> Result<(), ()> {
            assert_eq!(offset, FLASH_OFFSET);
            self.sector = [0xFF; SECTOR_SIZE];
            Ok(())
        }

        fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), ()> {
            assert_eq!(offset, FLASH_OFFSET);
            self.sector[..data.len()].copy_from_slice(data);
            Ok(())
        }
    }

    #[test]
    fn governor_name_round_trips() {
        let mut flash = FakeFlash::erased();
        let mut scratch = [0u8; SECTOR_SIZE];
        save_governor_name(&mut flash, &mut scratch, "adaptive").unwrap();

        let mut out = [0u8; MAX_NAME_LEN + 1];
        let len = load_governor_name(&mut flash, &mut out).unwrap();
        assert_eq!(&out[..len], b"adaptive");
    }

    #[test]
    fn tuning_blob_round_trips_and_coexists_with_name() {
        let mut flash = FakeFlash::erased();
        let mut scratch = [0u8; SECTOR_SIZE];
        save_governor_name(&mut flash, &mut scratch, "adaptive").unwrap();
        let payload: [u8; 64] = core::array::from_fn(|i| i as u8);
        save_tuning(&mut flash, &mut scratch, &payload).unwrap();

        let mut name_out = [0u8; MAX_NAME_LEN + 1];
        let name_len = load_governor_name(&mut flash, &mut name_out).unwrap();
        assert_eq!(&name_out[..name_len], b"adaptive");

        let mut tuning_out = [0u8; MAX_TUNING_LEN];
        let tuning_len = load_tuning(&mut flash, &mut tuning_out).unwrap();
        assert_eq!(tuning_len, 64);
        assert_eq!(tuning_out, payload);
    }

    #[test]
    fn load_on_erased_flash_returns_not_present() {
        let mut flash = FakeFlash::erased();
        let mut out = [0u8; MAX_NAME_LEN + 1];
        assert_eq!(
            load_governor_name(&mut flash, &mut out),
            Err(PersistError::NotPresent)
        );
    }

    #[test]
    fn corrupting_a_byte_before_the_crc_invalidates_load() {
        let mut flash = FakeFlash::erased();
        let mut scratch = [0u8; SECTOR_SIZE];
        save_governor_name(&mut flash, &mut scratch, "adaptive").unwrap();

        // Flip a bit inside the name field, before the trailing CRC word.
        flash.sector[8] ^= 0x01;

        let mut out = [0u8; MAX_NAME_LEN + 1];
        assert_eq!(
            load_governor_name(&mut flash, &mut out),
            Err(PersistError::NotPresent)
        );
    }

    #[test]
    fn name_too_long_is_rejected_before_touching_flash() {
        let mut flash = FakeFlash::erased();
        let mut scratch = [0u8; SECTOR_SIZE];
        let name_bytes = [b'a'; MAX_NAME_LEN + 1];
        let name = core::str::from_utf8(&name_bytes).unwrap();
        assert_eq!(
            save_governor_name(&mut flash, &mut scratch, name),
            Err(PersistError::NameTooLong)
        );
    }
}
