//! The frequency ramp engine: PLL-achievability search, voltage sequencing,
//! cross-core lockout during reconfiguration, and the single-step / blocking
//! ramp state machine.
//!
//! Real register access, the lockout primitive, and PLL validation live
//! behind [`ClockPlatform`] so this crate's arithmetic and ordering rules are
//! host-testable; `drv/rp2040-platform` is the only implementor that touches
//! silicon.
#![cfg_attr(not(test), no_std)]

use dvfs_shared::SharedState;
use dvfs_stability::StabilityArbiter;

ringbuf::ringbuf!(TRACE, Trace, 16, Trace::None);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Trace {
    None,
    Step { from: u32, to: u32 },
    VoltageSet(u32),
    PllEdgeClamp { attempted: u32, clamped_to: u32 },
}

/// Step size for a single ramp iteration, in kHz.
pub const RAMP_STEP_KHZ: u32 = 5000;
/// Pacing delay between steps of a blocking ramp, in milliseconds.
pub const RAMP_DELAY_MS: u32 = 10;
/// Upper bound on how far `find_achievable` will scan before giving up.
const MAX_SEARCH_STEPS: u32 = 50;

/// One of the MCU's four discrete VREG setpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Voltage {
    V1100,
    V1200,
    V1300,
    V1350,
}

impl Voltage {
    pub const fn millivolts(self) -> u32 {
        match self {
            Voltage::V1100 => 1100,
            Voltage::V1200 => 1200,
            Voltage::V1300 => 1300,
            Voltage::V1350 => 1350,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Voltage::V1100 => "1.10V (default)",
            Voltage::V1200 => "1.20V",
            Voltage::V1300 => "1.30V",
            Voltage::V1350 => "1.35V",
        }
    }
}

impl core::fmt::Display for Voltage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// The single authoritative voltage/frequency mapping. Call before raising
/// frequency, after lowering it.
pub fn min_voltage_for(khz: u32) -> Voltage {
    if khz > 250_000 {
        Voltage::V1350
    } else if khz > 200_000 {
        Voltage::V1200
    } else {
        Voltage::V1100
    }
}

/// Hardware access the ramp engine needs: PLL achievability and programming,
/// VREG setpoints, and the cross-core lockout primitive.
pub trait ClockPlatform {
    /// True if the PLL can lock to `khz` (a valid `fbdiv`/`pd1`/`pd2` triple
    /// exists for it).
    fn check_achievable(&mut self, khz: u32) -> bool;

    /// Attempt to actually reconfigure the PLL to `khz`. Returns `true` on
    /// success. May fail even for a `khz` that `check_achievable` accepted,
    /// if the requested frequency sits right on a PLL lock-range edge for
    /// this particular die.
    fn set_sys_clock_khz(&mut self, khz: u32) -> bool;

    /// Request `voltage`. Returns the voltage actually applied, which may be
    /// a fallback (e.g. 1.30 V when 1.35 V isn't available on this board).
    fn set_voltage(&mut self, voltage: Voltage) -> Voltage;

    /// Halt the sibling core. Must be paired with `lockout_end` before any
    /// other cross-core-visible state changes.
    fn lockout_start(&mut self);

    /// Resume the sibling core.
    fn lockout_end(&mut self);
}

/// Starting from `candidate`, scan 1 kHz at a time toward `target` for up to
/// [`MAX_SEARCH_STEPS`], returning the first value the hardware validator
/// accepts. Many integer kHz values have no valid PLL divisor triple; this
/// skips over them rather than giving up. Falls back to `target` unchanged
/// if nothing in range validates.
pub fn find_achievable<P: ClockPlatform>(platform: &mut P, candidate: u32, target: u32) -> u32 {
    let up = candidate <= target;
    let limit = target;
    let mut probe = candidate;

    for _ in 0..MAX_SEARCH_STEPS {
        if platform.check_achievable(probe) {
            return probe;
        }
        if up {
            probe += 1;
            if probe > limit {
                break;
            }
        } else {
            if probe == 0 {
                break;
            }
            probe -= 1;
            if probe < limit {
                break;
            }
        }
    }

    target
}

/// Owns the traversal of `current_khz` toward `target_khz` through
/// PLL-achievable frequencies, with correctly sequenced voltage changes.
pub struct RampEngine<'a> {
    shared: &'a SharedState,
}

impl<'a> RampEngine<'a> {
    pub const fn new(shared: &'a SharedState) -> Self {
        Self { shared }
    }

    /// Advance exactly one step toward `target`. Returns `true` if the
    /// target was reached (the caller can stop looping).
    ///
    /// Voltage sequencing: ramping up raises voltage before the PLL change
    /// (never under-volt); ramping down lowers it after (never over-volt).
    /// On a PLL-edge failure, `target_khz` is pulled back to `current_khz`
    /// so the governor stops retrying an unreachable value.
    pub fn ramp_step<P: ClockPlatform>(
        &self,
        platform: &mut P,
        target: u32,
        mut stability: Option<&mut StabilityArbiter>,
    ) -> bool {
        let current = self.shared.current_khz();
        if current == target {
            return true;
        }

        let stepping_up = current < target;
        let mut candidate = if stepping_up {
            current.saturating_add(RAMP_STEP_KHZ)
        } else {
            current.saturating_sub(RAMP_STEP_KHZ)
        };
        if stepping_up {
            if candidate > target {
                candidate = target;
            }
        } else if candidate < target {
            candidate = target;
        }

        let next = find_achievable(platform, candidate, target);

        if stepping_up {
            self.apply_voltage(platform, next);
        }

        platform.lockout_start();
        let ok = platform.set_sys_clock_khz(next);
        platform.lockout_end();

        if !ok {
            ringbuf::ringbuf_entry!(
                TRACE,
                Trace::PllEdgeClamp {
                    attempted: next,
                    clamped_to: current,
                }
            );
            self.shared.set_target_khz(current);
            return true;
        }

        if !stepping_up {
            self.apply_voltage(platform, next);
        }

        self.shared.set_current_khz(next);
        ringbuf::ringbuf_entry!(TRACE, Trace::Step { from: current, to: next });

        if let Some(arbiter) = stability.as_deref_mut() {
            arbiter.notify_freq_change(next);
        }

        next == target
    }

    /// Blocking ramp from `current_khz` to `target`, clamped to
    /// `[MIN_KHZ, MAX_KHZ]`. Paces steps by `delay_ms` and pings the
    /// liveness counter after every step so a long ramp (worst case ~28
    /// steps) never looks like a stalled governor core to the main-core
    /// watchdog.
    pub fn ramp_to<P: ClockPlatform>(
        &self,
        platform: &mut P,
        target: u32,
        mut stability: Option<&mut StabilityArbiter>,
        mut delay_ms: impl FnMut(u32),
    ) {
        let target = target.clamp(dvfs_shared::MIN_KHZ, dvfs_shared::MAX_KHZ);
        if self.shared.current_khz() == target {
            return;
        }

        loop {
            let reached = self.ramp_step(platform, target, stability.as_deref_mut());
            self.shared.ping_wdt();
            delay_ms(RAMP_DELAY_MS);
            if reached {
                break;
            }
        }
    }

    fn apply_voltage<P: ClockPlatform>(&self, platform: &mut P, khz: u32) {
        let applied = platform.set_voltage(min_voltage_for(khz));
        self.shared.set_current_voltage_mv(applied.millivolts());
        ringbuf::ringbuf_entry!(TRACE, Trace::VoltageSet(applied.millivolts()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Voltage(u32),
        Pll(u32),
    }

    struct FakePlatform {
        unreachable: std::collections::HashSet<u32>,
        fail_at: Option<u32>,
        events: Vec<Event>,
        lockout_depth: i32,
        max_lockout_depth: i32,
    }

    impl FakePlatform {
        fn new() -> Self {
            Self {
                unreachable: std::collections::HashSet::new(),
                fail_at: None,
                events: Vec::new(),
                lockout_depth: 0,
                max_lockout_depth: 0,
            }
        }
    }

    impl ClockPlatform for FakePlatform {
        fn check_achievable(&mut self, khz: u32) -> bool {
            !self.unreachable.contains(&khz)
        }

        fn set_sys_clock_khz(&mut self, khz: u32) -> bool {
            assert_eq!(
                self.lockout_depth, 1,
                "PLL must be reconfigured only while the sibling core is locked out"
            );
            self.events.push(Event::Pll(khz));
            self.fail_at != Some(khz)
        }

        fn set_voltage(&mut self, voltage: Voltage) -> Voltage {
            self.events.push(Event::Voltage(voltage.millivolts()));
            voltage
        }

        fn lockout_start(&mut self) {
            self.lockout_depth += 1;
            self.max_lockout_depth = self.max_lockout_depth.max(self.lockout_depth);
        }

        fn lockout_end(&mut self) {
            self.lockout_depth -= 1;
        }
    }

    #[test]
    fn min_voltage_table_matches_the_three_tiers() {
        assert_eq!(min_voltage_for(150_000), Voltage::V1100);
        assert_eq!(min_voltage_for(200_000), Voltage::V1100);
        assert_eq!(min_voltage_for(200_001), Voltage::V1200);
        assert_eq!(min_voltage_for(250_000), Voltage::V1200);
        assert_eq!(min_voltage_for(250_001), Voltage::V1350);
    }

    #[test]
    fn find_achievable_skips_unreachable_frequencies() {
        let mut platform = FakePlatform::new();
        platform.unreachable.insert(145_000);
        let next = find_achievable(&mut platform, 145_000, 150_000);
        assert_eq!(next, 145_001);
    }

    #[test]
    fn find_achievable_skips_unreachable_frequencies_scanning_down() {
        let mut platform = FakePlatform::new();
        platform.unreachable.insert(150_000);
        let next = find_achievable(&mut platform, 150_000, 145_000);
        assert_eq!(next, 149_999);
    }

    #[test]
    fn find_achievable_falls_back_to_target_if_nothing_validates() {
        let mut platform = FakePlatform::new();
        for khz in 145_000..=145_100 {
            platform.unreachable.insert(khz);
        }
        let next = find_achievable(&mut platform, 145_000, 150_000);
        assert_eq!(next, 150_000);
    }

    #[test]
    fn ramp_step_raises_voltage_before_pll_on_up_step() {
        let shared = SharedState::new();
        shared.set_current_khz(125_000);
        let engine = RampEngine::new(&shared);
        let mut platform = FakePlatform::new();

        engine.ramp_step(&mut platform, 130_000, None);

        assert_eq!(
            platform.events,
            std::vec![Event::Voltage(1100), Event::Pll(130_000)]
        );
        assert_eq!(shared.current_khz(), 130_000);
        assert_eq!(platform.max_lockout_depth, 1);
    }

    #[test]
    fn ramp_step_lowers_voltage_after_pll_on_down_step() {
        let shared = SharedState::new();
        shared.set_current_khz(260_000);
        shared.set_current_voltage_mv(1350);
        let engine = RampEngine::new(&shared);
        let mut platform = FakePlatform::new();

        engine.ramp_step(&mut platform, 255_000, None);

        assert_eq!(
            platform.events,
            std::vec![Event::Pll(255_000), Event::Voltage(1350)]
        );
        assert_eq!(shared.current_khz(), 255_000);
    }

    #[test]
    fn pll_edge_failure_clamps_target_to_current_and_holds_frequency() {
        let shared = SharedState::new();
        shared.set_current_khz(125_000);
        shared.set_target_khz(150_000);
        let engine = RampEngine::new(&shared);
        let mut platform = FakePlatform::new();
        platform.fail_at = Some(130_000);

        let reached = engine.ramp_step(&mut platform, 150_000, None);

        assert!(reached);
        assert_eq!(shared.current_khz(), 125_000, "hardware never moved");
        assert_eq!(shared.target_khz(), 125_000, "governor stops retrying");
    }

    #[test]
    fn ramp_to_reaches_max_with_expected_voltage_transitions() {
        let shared = SharedState::new();
        shared.set_current_khz(125_000);
        let engine = RampEngine::new(&shared);
        let mut platform = FakePlatform::new();
        let mut delay_calls = 0u32;

        engine.ramp_to(&mut platform, dvfs_shared::MAX_KHZ, None, |_ms| {
            delay_calls += 1;
        });

        assert_eq!(shared.current_khz(), dvfs_shared::MAX_KHZ);
        assert!(delay_calls >= 1);

        let voltages: Vec<u32> = platform
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Voltage(mv) => Some(*mv),
                Event::Pll(_) => None,
            })
            .collect();
        assert!(voltages.contains(&1200));
        assert!(voltages.contains(&1350));

        // Every voltage change observed is immediately followed by a PLL
        // change to a frequency whose minimum safe voltage is no higher
        // than what was just applied (up-steps never run the PLL ahead of
        // the voltage that covers it).
        for window in platform.events.windows(2) {
            if let (Event::Voltage(mv), Event::Pll(khz)) = (&window[0], &window[1]) {
                assert!(min_voltage_for(*khz).millivolts() <= *mv);
            }
        }
    }

    #[test]
    fn wdt_ping_advances_once_per_step_plus_one() {
        let shared = SharedState::new();
        shared.set_current_khz(250_000);
        let engine = RampEngine::new(&shared);
        let mut platform = FakePlatform::new();

        engine.ramp_to(&mut platform, 265_000, None, |_| {});

        // 3 steps of 5 MHz to cover 15 MHz, each pings once.
        assert_eq!(shared.wdt_ping(), 3);
    }

    #[test]
    fn notify_freq_change_is_forwarded_to_an_installed_arbiter() {
        let shared = SharedState::new();
        shared.set_current_khz(125_000);
        let engine = RampEngine::new(&shared);
        let mut platform = FakePlatform::new();
        let mut arbiter = StabilityArbiter::new();

        engine.ramp_step(&mut platform, 130_000, Some(&mut arbiter));

        assert_eq!(arbiter.snapshot().stable_count, 0);
    }
}
