//! PIO-assisted stability arbiter: idle-fraction EMA and heartbeat-period
//! jitter, gating whether the ramp engine should be allowed to request a new
//! frequency right now.
//!
//! The two PIO state machines themselves (idle-line tick counter, heartbeat
//! period timer) live behind [`PioSource`] so the EMA/jitter arithmetic is
//! host-testable with a scripted tick sequence.
#![cfg_attr(not(test), no_std)]

/// EMA coefficient for the idle-fraction estimate (SPEC_FULL.md §9: the
/// original's coefficient was unspecified; 0.25 is the adopted default).
pub const IDLE_FRACTION_EMA_ALPHA: f32 = 0.25;

/// Jitter threshold, as a coefficient of variation percentage, below which a
/// newly observed heartbeat period counts toward `stable_count`.
pub const STABLE_CV_PCT: f32 = 3.0;

/// Default thresholds `safe_to_scale` is cached against in every
/// [`StabilitySnapshot`] (the upstream header's own worked example).
pub const DEFAULT_IDLE_THRESH: f32 = 0.03;
pub const DEFAULT_JITTER_THRESH: f32 = STABLE_CV_PCT;
pub const DEFAULT_MIN_STABLE: u32 = 4;

/// Heartbeat periods to discard immediately after a frequency change, before
/// jitter samples resume counting toward stability.
const SETTLE_PERIODS: u32 = 1;

/// Each SM loop is two instructions per tick.
const TICKS_TO_US_NUMERATOR: u64 = 2000;

/// One drained poll of the PIO FIFOs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PioEvent {
    /// Ticks the IDLE line was observed high during this window.
    pub idle_ticks: u32,
    /// Total PIO ticks covered by this window (the window's length).
    pub window_ticks: u32,
    /// A newly completed heartbeat period, in PIO ticks, if SM1's FIFO
    /// produced one this poll.
    pub hb_period_ticks: Option<u32>,
}

/// Abstraction over the two PIO state machines so the arbiter's arithmetic
/// can run against a scripted fake off real hardware.
pub trait PioSource {
    fn poll(&mut self) -> PioEvent;
}

/// A point-in-time view of the arbiter's internal statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StabilitySnapshot {
    pub idle_ticks: u32,
    pub idle_fraction: f32,
    pub hb_period_ticks: u32,
    pub hb_period_prev: u32,
    pub hb_jitter_ticks: i32,
    pub hb_jitter_pct: f32,
    pub stable_count: u32,
    pub safe_to_scale: bool,
}

pub struct StabilityArbiter {
    idle_ticks: u32,
    idle_fraction: f32,
    hb_period_ticks: u32,
    hb_period_prev: u32,
    hb_jitter_ticks: i32,
    hb_jitter_pct: f32,
    stable_count: u32,
    settle_remaining: u32,
    has_prev_period: bool,
}

impl StabilityArbiter {
    pub const fn new() -> Self {
        Self {
            idle_ticks: 0,
            idle_fraction: 0.0,
            hb_period_ticks: 0,
            hb_period_prev: 0,
            hb_jitter_ticks: 0,
            hb_jitter_pct: 0.0,
            stable_count: 0,
            settle_remaining: 0,
            has_prev_period: false,
        }
    }

    /// Drain one poll's worth of PIO events and update the EMA/jitter state.
    pub fn poll<S: PioSource>(&mut self, source: &mut S) {
        let event = source.poll();

        self.idle_ticks = event.idle_ticks;
        if event.window_ticks > 0 {
            let sample = event.idle_ticks as f32 / event.window_ticks as f32;
            self.idle_fraction =
                IDLE_FRACTION_EMA_ALPHA * sample + (1.0 - IDLE_FRACTION_EMA_ALPHA) * self.idle_fraction;
        }

        let Some(period) = event.hb_period_ticks else {
            return;
        };

        if !self.has_prev_period {
            // First period observed, or the first one after a frequency
            // change: no baseline to diff against yet.
            self.hb_period_prev = 0;
            self.hb_period_ticks = period;
            self.hb_jitter_ticks = 0;
            self.hb_jitter_pct = 0.0;
            self.has_prev_period = true;
            return;
        }

        self.hb_period_prev = self.hb_period_ticks;
        self.hb_period_ticks = period;

        let jitter = period as i32 - self.hb_period_prev as i32;
        self.hb_jitter_ticks = jitter;
        self.hb_jitter_pct = (jitter.unsigned_abs() as f32 / self.hb_period_prev as f32) * 100.0;

        if self.settle_remaining > 0 {
            self.settle_remaining -= 1;
            return;
        }

        if self.hb_jitter_pct <= STABLE_CV_PCT {
            self.stable_count += 1;
        } else {
            self.stable_count = 0;
        }
    }

    /// Must be called immediately after every successful clock change.
    /// Resets the jitter baseline and opens a short settle window during
    /// which new samples are discarded from the stability calculation.
    pub fn notify_freq_change(&mut self, _new_khz: u32) {
        self.has_prev_period = false;
        self.hb_period_prev = 0;
        self.stable_count = 0;
        self.settle_remaining = SETTLE_PERIODS;
    }

    /// True iff jitter is within `jitter_thresh` percent and at least
    /// `min_stable` consecutive periods have been observed since the last
    /// `notify_freq_change`. `idle_thresh` is accepted for API symmetry with
    /// the upstream PIO stats struct but does not gate this decision.
    pub fn safe_to_scale(&self, _idle_thresh: f32, jitter_thresh: f32, min_stable: u32) -> bool {
        self.hb_jitter_pct <= jitter_thresh && self.stable_count >= min_stable
    }

    pub fn snapshot(&self) -> StabilitySnapshot {
        StabilitySnapshot {
            idle_ticks: self.idle_ticks,
            idle_fraction: self.idle_fraction,
            hb_period_ticks: self.hb_period_ticks,
            hb_period_prev: self.hb_period_prev,
            hb_jitter_ticks: self.hb_jitter_ticks,
            hb_jitter_pct: self.hb_jitter_pct,
            stable_count: self.stable_count,
            safe_to_scale: self.safe_to_scale(
                DEFAULT_IDLE_THRESH,
                DEFAULT_JITTER_THRESH,
                DEFAULT_MIN_STABLE,
            ),
        }
    }
}

impl Default for StabilityArbiter {
    fn default() -> Self {
        Self::new()
    }
}

/// `safe_to_scale`, fail-open when no arbiter is installed at all (missing
/// sensor should never block the governor).
pub fn safe_to_scale_or_default(
    arbiter: Option<&StabilityArbiter>,
    idle_thresh: f32,
    jitter_thresh: f32,
    min_stable: u32,
) -> bool {
    match arbiter {
        Some(a) => a.safe_to_scale(idle_thresh, jitter_thresh, min_stable),
        None => true,
    }
}

/// Convert a PIO tick count to microseconds at the given system clock.
pub fn ticks_to_us(ticks: u32, sys_khz: u32) -> u32 {
    if sys_khz == 0 {
        return 0;
    }
    ((u64::from(ticks) * TICKS_TO_US_NUMERATOR) / u64::from(sys_khz)) as u32
}
