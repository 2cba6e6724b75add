//! System PLL and VREG control: the real implementation behind
//! `dvfs_ramp::ClockPlatform`.
//!
//! Register access follows the teacher's `drv/rp2040-sys` idiom —
//! `unsafe { &*device::X::ptr() }` rather than owning the PAC singleton —
//! since this driver only ever touches PLL_SYS/CLOCKS/VREG/RESETS and never
//! needs exclusive ownership of the whole peripheral set.
use dvfs_ramp::{ClockPlatform, Voltage};
use rp2040_pac as device;

use crate::lockout::Lockout;

/// RP2040 boards run off a 12 MHz crystal.
const XOSC_KHZ: u32 = 12_000;
const VCO_MIN_KHZ: u32 = 750_000;
const VCO_MAX_KHZ: u32 = 1_600_000;
const FBDIV_MIN: u32 = 16;
const FBDIV_MAX: u32 = 320;
const POSTDIV_MAX: u8 = 7;

/// Find an `(fbdiv, postdiv1, postdiv2)` triple that reaches `khz` exactly,
/// within the RP2040's documented PLL constraints (ported from the VCO/fbdiv/
/// postdiv bounds in `system.c`'s `find_achievable_khz` comment).
fn pll_params_for(khz: u32) -> Option<(u32, u8, u8)> {
    if khz == 0 {
        return None;
    }
    for fbdiv in (FBDIV_MIN..=FBDIV_MAX).rev() {
        let vco_khz = XOSC_KHZ * fbdiv;
        if vco_khz < VCO_MIN_KHZ || vco_khz > VCO_MAX_KHZ {
            continue;
        }
        for pd1 in 1..=POSTDIV_MAX {
            for pd2 in 1..=pd1 {
                let div = u32::from(pd1) * u32::from(pd2);
                if vco_khz % div == 0 && vco_khz / div == khz {
                    return Some((fbdiv, pd1, pd2));
                }
            }
        }
    }
    None
}

pub struct Rp2040Clock<'a> {
    lockout: &'a Lockout,
}

impl<'a> Rp2040Clock<'a> {
    /// # Safety
    /// Caller must ensure no other code concurrently touches `PLL_SYS`,
    /// `CLOCKS`, `VREG_AND_CHIP_RESET`, or `RESETS` while this handle is
    /// alive — the usual `Peripherals::steal()` contract.
    pub unsafe fn new(lockout: &'a Lockout) -> Self {
        Self { lockout }
    }

    fn reconfigure_pll(&mut self, fbdiv: u32, pd1: u8, pd2: u8) {
        let clocks = unsafe { &*device::CLOCKS::ptr() };
        let pll = unsafe { &*device::PLL_SYS::ptr() };
        let resets = unsafe { &*device::RESETS::ptr() };

        // Glitchlessly move clk_sys onto clk_ref (always XOSC-stable) while
        // the PLL driving its aux source is reconfigured out from under it.
        clocks.clk_sys_ctrl.modify(|_, w| w.src().clk_ref());
        while clocks.clk_sys_selected.read().bits() != 1 {}

        resets.reset.modify(|_, w| w.pll_sys().set_bit());
        resets.reset.modify(|_, w| w.pll_sys().clear_bit());
        while resets.reset_done.read().pll_sys().bit_is_clear() {}

        pll.pwr.modify(|_, w| w.vcopd().set_bit().postdivpd().set_bit());
        pll.cs.write(|w| unsafe { w.refdiv().bits(1) });
        pll.fbdiv_int.write(|w| unsafe { w.bits(fbdiv) });
        pll.pwr.modify(|_, w| w.vcopd().clear_bit());
        while pll.cs.read().lock().bit_is_clear() {}

        pll.prim.write(|w| unsafe {
            w.postdiv1().bits(pd1).postdiv2().bits(pd2)
        });
        pll.pwr.modify(|_, w| w.postdivpd().clear_bit());

        clocks
            .clk_sys_ctrl
            .modify(|_, w| w.auxsrc().clksrc_pll_sys());
        clocks.clk_sys_ctrl.modify(|_, w| w.src().clksrc_clk_sys_aux());
        while clocks.clk_sys_selected.read().bits() != 2 {}
    }
}

impl ClockPlatform for Rp2040Clock<'_> {
    fn check_achievable(&mut self, khz: u32) -> bool {
        pll_params_for(khz).is_some()
    }

    fn set_sys_clock_khz(&mut self, khz: u32) -> bool {
        let Some((fbdiv, pd1, pd2)) = pll_params_for(khz) else {
            return false;
        };
        self.reconfigure_pll(fbdiv, pd1, pd2);
        true
    }

    fn set_voltage(&mut self, voltage: Voltage) -> Voltage {
        let vreg = unsafe { &*device::VREG_AND_CHIP_RESET::ptr() };
        let vsel = match voltage {
            Voltage::V1100 => 0b0_1011,
            Voltage::V1200 => 0b0_1101,
            Voltage::V1300 => 0b0_1111,
            Voltage::V1350 => 0b1_0000,
        };
        vreg.vreg.modify(|_, w| unsafe { w.vsel().bits(vsel) });
        voltage
    }

    fn lockout_start(&mut self) {
        self.lockout.start_blocking();
    }

    fn lockout_end(&mut self) {
        self.lockout.end_blocking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_round_5mhz_step_between_min_and_max_is_achievable() {
        let mut khz = 125_000;
        while khz <= 265_000 {
            // Not every 5 MHz step resolves exactly (that's the whole reason
            // find_achievable exists upstream); this just confirms the
            // search terminates and stays within the documented fbdiv range
            // when it does resolve.
            if let Some((fbdiv, pd1, pd2)) = pll_params_for(khz) {
                assert!((FBDIV_MIN..=FBDIV_MAX).contains(&fbdiv));
                assert!(pd1 >= 1 && pd1 <= POSTDIV_MAX);
                assert!(pd2 >= 1 && pd2 <= pd1);
            }
            khz += 5_000;
        }
    }

    #[test]
    fn a_known_achievable_frequency_resolves() {
        // 125 MHz = 12 MHz * 125 / 12 -> fbdiv 125, pd1=6, pd2=2 (vco=1500MHz)
        assert!(pll_params_for(125_000).is_some());
    }

    #[test]
    fn zero_khz_is_never_achievable() {
        assert!(pll_params_for(0).is_none());
    }
}
