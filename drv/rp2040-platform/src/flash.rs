//! Flash persistence backend for `dvfs_persist::FlashDevice`.
//!
//! Reads go straight through the XIP memory map; erase/program route
//! through `rp2040-flash`'s boot-ROM wrappers, which require flash code
//! execution to stop on both cores for the duration — handled here by the
//! same [`Lockout`] the clock driver uses for PLL reconfiguration, since
//! the constraint ("hold the sibling core off, not merely delay it") is
//! identical.
use dvfs_persist::FlashDevice;

use crate::lockout::Lockout;
use crate::Trace;

/// RP2040's XIP-mapped flash base address.
const XIP_BASE: u32 = 0x1000_0000;

pub struct Rp2040Flash<'a> {
    lockout: &'a Lockout,
}

impl<'a> Rp2040Flash<'a> {
    /// # Safety
    /// Caller must ensure exclusive access to the flash controller and that
    /// `lockout` is shared with whatever runs on the sibling core, so it can
    /// park itself out of flash-resident code during erase/program.
    pub unsafe fn new(lockout: &'a Lockout) -> Self {
        Self { lockout }
    }
}

impl FlashDevice for Rp2040Flash<'_> {
    type Error = ();

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), ()> {
        let addr = (XIP_BASE + offset) as *const u8;
        unsafe {
            core::ptr::copy_nonoverlapping(addr, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn erase_sector(&mut self, offset: u32) -> Result<(), ()> {
        ringbuf::ringbuf_entry!(crate::TRACE, Trace::FlashWriteStart);
        self.lockout.start_blocking();
        critical_section::with(|_| unsafe {
            rp2040_flash::flash_range_erase(offset, dvfs_persist::SECTOR_SIZE as u32, true);
        });
        self.lockout.end_blocking();
        Ok(())
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), ()> {
        self.lockout.start_blocking();
        critical_section::with(|_| unsafe {
            rp2040_flash::flash_range_program(offset, data, true);
        });
        self.lockout.end_blocking();
        ringbuf::ringbuf_entry!(crate::TRACE, Trace::FlashWriteDone);
        Ok(())
    }
}
