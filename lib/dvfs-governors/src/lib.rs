//! The four built-in scaling policies: `performance`, `ondemand`,
//! `schedutil`, and the RP2040-tuned `adaptive` governor.
//!
//! Each is a plain struct implementing `dvfs_governor::Governor`, acting
//! only through the `GovernorEnv` it's handed each call — no policy here
//! touches hardware directly, which is what makes them host-testable by
//! scripting a fake environment's temperature/clock/metrics.
#![cfg_attr(not(test), no_std)]

mod adaptive;
mod ondemand;
mod performance;
mod schedutil;

pub use adaptive::{Adaptive, AdaptiveParamError, AdaptiveParams};
pub use ondemand::Ondemand;
pub use performance::Performance;
pub use schedutil::Schedutil;

use dvfs_governor::Registry;

ringbuf::ringbuf!(TRACE, Trace, 32, Trace::None);

/// One entry per policy decision point, mirroring the original's scattered
/// `dmesg_log` call sites closely enough to reconstruct the same story from
/// a trace dump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Trace {
    None,
    OndemandRampUpMetrics(u32),
    OndemandRampUp(u32),
    OndemandBackoffHot(u32),
    OndemandIdleBackoff(u32),
    SchedutilTarget(u32),
    SchedutilIdleBackoff(u32),
    PerformanceToMax,
    AdaptiveExitIdle,
    AdaptiveRampUpMetrics(u32),
    AdaptiveRampUpMedium(u32),
    AdaptiveToIdle(u32),
    AdaptiveIdleTimeout(u32),
    AdaptiveThermalBackoff(u32),
    AdaptiveRestoreMax,
}

/// Register all four built-ins into `registry`, in the original's
/// `governors_init` order (`ondemand, schedutil, performance, rp2040_perf`
/// in the source; kept here so name-based lookups and "first registered"
/// fallback behave identically).
pub fn register_builtins<'r>(
    registry: &mut Registry<'r>,
    ondemand: &'r mut Ondemand,
    schedutil: &'r mut Schedutil,
    performance: &'r mut Performance,
    adaptive: &'r mut Adaptive,
) {
    registry.register(ondemand);
    registry.register(schedutil);
    registry.register(performance);
    registry.register(adaptive);
}

/// The adaptive governor's own registered name, used as the
/// `preferred_name` argument to `Registry::select_initial` (mirrors the
/// original's `governors_find_by_name("rp2040_perf")` boot fallback).
pub const PREFERRED_GOVERNOR_NAME: &str = "rp2040_perf";
