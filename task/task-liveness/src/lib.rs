//! Main-core watchdog and the (parser-less) shell-facing API surface.
//!
//! Mirrors `main.c`'s REPL loop, minus the REPL: one heartbeat pulse and one
//! idle-window bracket per iteration (driving the two GPIO lines
//! `rp2040_platform::Rp2040Pio` reads on the governor core), a 5 s liveness
//! check against `wdt_ping`, and a poll of the shared [`Lockout`] so the
//! governor core can park this core during PLL/flash reconfiguration.
//!
//! [`shell_api`] exposes every operation a command shell would dispatch to
//! (`set_target`, `governor_*`, `metrics_*`, `persist_show`, `pio_*`) as
//! plain functions over the already cross-core-shared types. No parser
//! reads stdin and calls them — wiring a REPL onto this surface is future
//! work, out of scope here.
#![cfg_attr(not(test), no_std)]

use cortex_m::peripheral::SCB;
use dvfs_shared::SharedState;
use rp2040_hal::Timer;
use rp2040_pac as device;
use rp2040_platform::Lockout;

ringbuf::ringbuf!(TRACE, Trace, 8, Trace::None);

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Trace {
    None,
    WatchdogTimeout,
}

/// Matches `rp2040-platform`'s `pio_stats` module — this task is the
/// producer of the two lines that module consumes.
const IDLE_PIN: u32 = 20;
const HB_PIN: u32 = 21;

/// How long the watchdog will tolerate a frozen `wdt_ping`.
const LIVENESS_TIMEOUT_MS: u32 = 5000;

fn now_ms(timer: &Timer) -> u32 {
    (timer.get_counter().ticks() / 1000) as u32
}

fn gpio_set(mask: u32) {
    let sio = unsafe { &*device::SIO::ptr() };
    unsafe { sio.gpio_out_set.write(|w| w.bits(mask)) };
}

fn gpio_clear(mask: u32) {
    let sio = unsafe { &*device::SIO::ptr() };
    unsafe { sio.gpio_out_clr.write(|w| w.bits(mask)) };
}

/// The main core's entire job. Never returns.
///
/// # Safety
/// Caller must have already configured `IDLE_PIN`/`HB_PIN` as SIO outputs,
/// the same precondition `Rp2040Pio::new` documents for the read side.
pub unsafe fn run(shared: &SharedState, mut timer: Timer, lockout: &Lockout) -> ! {
    let mut last_ping_val = shared.wdt_ping();
    let mut last_ping_ms = now_ms(&timer);

    loop {
        // One heartbeat pulse per iteration, before the idle bracket, so
        // SM1's measured period covers the whole iteration.
        gpio_set(1 << HB_PIN);
        gpio_clear(1 << HB_PIN);

        gpio_set(1 << IDLE_PIN);
        // No shell parser to block on; a short fixed idle window stands in
        // for `getchar_timeout_us`'s blocking wait.
        let start = timer.get_counter().ticks();
        while timer.get_counter().ticks() - start < 100 {
            core::hint::spin_loop();
        }
        gpio_clear(1 << IDLE_PIN);

        lockout.poll_as_victim();

        let now = now_ms(&timer);
        if now.wrapping_sub(last_ping_ms) >= LIVENESS_TIMEOUT_MS {
            let current = shared.wdt_ping();
            if current == last_ping_val {
                ringbuf::ringbuf_entry!(TRACE, Trace::WatchdogTimeout);
                SCB::sys_reset();
            }
            last_ping_val = current;
            last_ping_ms = now;
        }
    }
}

/// Operations a command shell would dispatch to, exposed directly over the
/// shared types rather than behind a parser (none exists yet).
pub mod shell_api {
    use dvfs_governor::{GovernorEnv, Registry};
    use dvfs_metrics::{Aggregate, MetricsPipeline};
    use dvfs_persist::FlashDevice;
    use dvfs_shared::{SharedState, MAX_KHZ, MIN_KHZ};
    use dvfs_stability::{StabilityArbiter, StabilitySnapshot};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SetTargetError {
        OutOfRange,
    }

    /// `set_target(mhz)`: validates `MIN_KHZ <= khz <= MAX_KHZ`.
    pub fn set_target(shared: &SharedState, khz: u32) -> Result<(), SetTargetError> {
        if khz < MIN_KHZ || khz > MAX_KHZ {
            return Err(SetTargetError::OutOfRange);
        }
        shared.set_target_khz(khz);
        Ok(())
    }

    /// `governor_list`.
    pub fn governor_list<'r>(registry: &Registry<'r>) -> impl Iterator<Item = &'static str> + '_ {
        (0..registry.count()).filter_map(|i| registry.get(i).map(|g| g.name()))
    }

    /// `governor_current`.
    pub fn governor_current(registry: &Registry<'_>) -> Option<&'static str> {
        registry.current_name()
    }

    /// `governor_set(name)`.
    pub fn governor_set(registry: &mut Registry<'_>, name: &str, env: &mut dyn GovernorEnv) -> bool {
        match registry.find_by_name(name) {
            Some(idx) => registry.set_current(idx, env),
            None => false,
        }
    }

    /// `metrics_submit`.
    pub fn metrics_submit(
        metrics: &MetricsPipeline,
        workload: u32,
        intensity: u32,
        duration_ms: u32,
        ts_ms: u32,
    ) {
        metrics.submit(workload, intensity, duration_ms, ts_ms);
    }

    /// `metrics_aggregate_peek`.
    pub fn metrics_aggregate_peek(metrics: &MetricsPipeline) -> Aggregate {
        metrics.aggregate(false)
    }

    /// `metrics_aggregate_consume`.
    pub fn metrics_aggregate_consume(metrics: &MetricsPipeline) -> Aggregate {
        metrics.aggregate(true)
    }

    /// `persist_show`: whether a persisted governor name and tuning blob are
    /// present, without exposing their contents.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PersistShow {
        pub governor_present: bool,
        pub tuning_present: bool,
    }

    pub fn persist_show<F: FlashDevice>(flash: &mut F) -> PersistShow {
        let mut name_buf = [0u8; dvfs_persist::MAX_NAME_LEN + 1];
        let mut tuning_buf = [0u8; dvfs_persist::MAX_TUNING_LEN];
        PersistShow {
            governor_present: dvfs_persist::load_governor_name(flash, &mut name_buf).is_ok(),
            tuning_present: dvfs_persist::load_tuning(flash, &mut tuning_buf).is_ok(),
        }
    }

    /// `pio_stats`.
    pub fn pio_stats(arbiter: &StabilityArbiter) -> StabilitySnapshot {
        arbiter.snapshot()
    }

    /// `pio_safe`.
    pub fn pio_safe(
        arbiter: &StabilityArbiter,
        idle_thresh: f32,
        jitter_thresh: f32,
        min_stable: u32,
    ) -> bool {
        arbiter.safe_to_scale(idle_thresh, jitter_thresh, min_stable)
    }

    /// `pio_reset`: re-arm the arbiter's stability window from scratch.
    pub fn pio_reset(arbiter: &mut StabilityArbiter) {
        *arbiter = StabilityArbiter::new();
    }
}
