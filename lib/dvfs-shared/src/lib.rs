//! Shared, word-sized, cross-core state for the DVFS control plane.
//!
//! Every field here is a single aligned atomic word, so it can be read from
//! either core without ever observing a torn value. Ownership of *writes* is
//! documented per-field; see the governor framework and ramp engine for the
//! modules that actually hold write access in normal operation.
#![no_std]

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Lowest permitted system clock, in kHz.
pub const MIN_KHZ: u32 = 125_000;
/// Highest permitted system clock, in kHz.
pub const MAX_KHZ: u32 = 265_000;

/// The atomic cells backing the shared process-wide DVFS state.
///
/// Written primarily by the governor core (`current_khz`, `current_voltage_mv`
/// only from the ramp engine; `target_khz` from the current governor), except
/// `live_stats`/`stat_period_ms` (shell/main core) and `wdt_ping` (both cores).
pub struct SharedState {
    target_khz: AtomicU32,
    current_khz: AtomicU32,
    current_voltage_mv: AtomicU32,
    live_stats: AtomicBool,
    throttle_active: AtomicBool,
    wdt_ping: AtomicU32,
    stat_period_ms: AtomicU32,
}

impl SharedState {
    /// Boot-time defaults: clock parked at `MIN_KHZ`, target aimed at
    /// `MAX_KHZ` until a governor narrows it, default 1.10 V rail.
    pub const fn new() -> Self {
        Self {
            target_khz: AtomicU32::new(MAX_KHZ),
            current_khz: AtomicU32::new(MIN_KHZ),
            current_voltage_mv: AtomicU32::new(1100),
            live_stats: AtomicBool::new(false),
            throttle_active: AtomicBool::new(false),
            wdt_ping: AtomicU32::new(0),
            stat_period_ms: AtomicU32::new(500),
        }
    }

    pub fn target_khz(&self) -> u32 {
        self.target_khz.load(Ordering::Relaxed)
    }

    /// Clamped to `[MIN_KHZ, MAX_KHZ]`; the only write path available to the
    /// shell (the governor core writes through the same setter).
    pub fn set_target_khz(&self, khz: u32) {
        self.target_khz
            .store(khz.clamp(MIN_KHZ, MAX_KHZ), Ordering::Relaxed);
    }

    pub fn current_khz(&self) -> u32 {
        self.current_khz.load(Ordering::Relaxed)
    }

    /// Ramp-engine-only write path.
    pub fn set_current_khz(&self, khz: u32) {
        self.current_khz.store(khz, Ordering::Relaxed);
    }

    pub fn current_voltage_mv(&self) -> u32 {
        self.current_voltage_mv.load(Ordering::Relaxed)
    }

    /// Ramp-engine-only write path.
    pub fn set_current_voltage_mv(&self, mv: u32) {
        self.current_voltage_mv.store(mv, Ordering::Relaxed);
    }

    pub fn live_stats(&self) -> bool {
        self.live_stats.load(Ordering::Relaxed)
    }

    pub fn set_live_stats(&self, enabled: bool) {
        self.live_stats.store(enabled, Ordering::Relaxed);
    }

    pub fn throttle_active(&self) -> bool {
        self.throttle_active.load(Ordering::Relaxed)
    }

    pub fn set_throttle_active(&self, active: bool) {
        self.throttle_active.store(active, Ordering::Relaxed);
    }

    pub fn wdt_ping(&self) -> u32 {
        self.wdt_ping.load(Ordering::Relaxed)
    }

    /// Advance the liveness counter. Called once per governor iteration and
    /// once per ramp step; the liveness monitor never needs a lock to read
    /// this since a wrapping increment is still "changed" to an observer.
    pub fn ping_wdt(&self) {
        self.wdt_ping.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stat_period_ms(&self) -> u32 {
        self.stat_period_ms.load(Ordering::Relaxed)
    }

    pub fn set_stat_period_ms(&self, period_ms: u32) {
        self.stat_period_ms.store(period_ms, Ordering::Relaxed);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
