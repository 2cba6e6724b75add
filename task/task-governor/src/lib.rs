//! Sibling-core governor loop.
//!
//! Owns every governor policy, the registry, and the `GovernorEnv`
//! implementation they run against. `app/dual-core-governor` builds a
//! [`Platform`] out of `rp2040-platform` drivers plus the shared-state/
//! metrics singletons and hands it to [`run`], which never returns — this
//! is the entire body of core 1.
#![cfg_attr(not(test), no_std)]

use core::fmt::Write as _;

use dvfs_governor::{GovernorEnv, Registry};
use dvfs_governors::{
    register_builtins, Adaptive, Ondemand, Performance, Schedutil, PREFERRED_GOVERNOR_NAME,
};
use dvfs_metrics::{KernelSnapshot, MetricsPipeline};
use dvfs_persist::SECTOR_SIZE;
use dvfs_ramp::{min_voltage_for, RampEngine};
use dvfs_shared::SharedState;
use dvfs_stability::StabilityArbiter;
use rp2040_hal::Timer;
use rp2040_platform::{LogSink, Rp2040Clock, Rp2040Flash, Rp2040Pio, Temperature};

ringbuf::ringbuf!(TRACE, Trace, 16, Trace::None);

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Trace {
    None,
    Started,
    IdleDispatch,
}

/// Everything the governor core needs, assembled by `app/dual-core-governor`
/// from `rp2040-platform` drivers and the process-wide singletons.
pub struct Platform<'a> {
    pub shared: &'a SharedState,
    pub metrics: &'a MetricsPipeline,
    pub clock: Rp2040Clock<'a>,
    pub flash: Rp2040Flash<'a>,
    pub temperature: Temperature,
    pub timer: Timer,
    pub pio: Rp2040Pio,
    pub log: LogSink,
    pub scratch: &'a mut [u8; SECTOR_SIZE],
}

/// The concrete `GovernorEnv`. Holds its own `ClockPlatform`/`FlashDevice`
/// rather than being generic over them, since `GovernorEnv` is consumed
/// through `&mut dyn GovernorEnv` and trait objects can't carry type
/// parameters.
struct Env<'a> {
    shared: &'a SharedState,
    clock: Rp2040Clock<'a>,
    flash: Rp2040Flash<'a>,
    temperature: Temperature,
    timer: Timer,
    stability: StabilityArbiter,
    scratch: &'a mut [u8; SECTOR_SIZE],
}

impl Env<'_> {
    fn now_us_raw(&self) -> u64 {
        self.timer.get_counter().ticks()
    }
}

impl GovernorEnv for Env<'_> {
    fn shared(&self) -> &SharedState {
        self.shared
    }

    fn temperature_c(&mut self) -> f32 {
        self.temperature.read_celsius()
    }

    fn now_us(&mut self) -> u64 {
        self.now_us_raw()
    }

    fn delay_ms(&mut self, ms: u32) {
        let start = self.now_us_raw();
        let target = start + u64::from(ms) * 1000;
        while self.now_us_raw() < target {
            core::hint::spin_loop();
        }
    }

    fn ramp_step(&mut self, target_khz: u32) -> bool {
        let engine = RampEngine::new(self.shared);
        engine.ramp_step(&mut self.clock, target_khz, Some(&mut self.stability))
    }

    fn prewarm_voltage(&mut self, khz: u32) -> u32 {
        let applied = self.clock.set_voltage(min_voltage_for(khz));
        self.shared.set_current_voltage_mv(applied.millivolts());
        applied.millivolts()
    }

    fn load_tuning(&mut self, buf: &mut [u8]) -> Option<usize> {
        dvfs_persist::load_tuning(&mut self.flash, buf).ok()
    }

    fn save_tuning(&mut self, bytes: &[u8]) {
        let _ = dvfs_persist::save_tuning(&mut self.flash, self.scratch, bytes);
    }
}

fn emit_stat_line(shared: &SharedState, temp_c: f32, log: &mut LogSink) {
    let mut line: heapless::String<128> = heapless::String::new();
    let _ = write!(
        line,
        "STAT clk={:.2}MHz target={:.2}MHz temp={:.1}C vreg={}",
        shared.current_khz() as f32 / 1000.0,
        shared.target_khz() as f32 / 1000.0,
        temp_c,
        min_voltage_for(shared.current_khz()).label(),
    );
    log.send(line.as_str());
}

/// The sibling core's entire job. Mirrors the original's `core1_entry`:
/// pick a governor, then forever dispatch `tick` against fresh (consumed)
/// metrics, time it, publish the running average, and emit the optional
/// stat line.
pub fn run(platform: Platform<'_>) -> ! {
    let Platform {
        shared,
        metrics,
        clock,
        flash,
        temperature,
        timer,
        mut pio,
        mut log,
        scratch,
    } = platform;

    let mut env = Env {
        shared,
        clock,
        flash,
        temperature,
        timer,
        stability: StabilityArbiter::new(),
        scratch,
    };

    let mut ondemand = Ondemand::new();
    let mut schedutil = Schedutil::new();
    let mut performance = Performance::new();
    let mut adaptive = Adaptive::new();

    let mut registry = Registry::new();
    register_builtins(
        &mut registry,
        &mut ondemand,
        &mut schedutil,
        &mut performance,
        &mut adaptive,
    );

    let mut name_buf = [0u8; dvfs_persist::MAX_NAME_LEN + 1];
    let persisted_len = dvfs_persist::load_governor_name(&mut env.flash, &mut name_buf).ok();
    let persisted_name =
        persisted_len.and_then(|len| core::str::from_utf8(&name_buf[..len]).ok());

    registry.select_initial(persisted_name, PREFERRED_GOVERNOR_NAME, &mut env);
    ringbuf::ringbuf_entry!(TRACE, Trace::Started);

    let mut tick_count: u32 = 0;
    let mut tick_avg_ms: f64 = 0.0;
    let mut last_stat_ms = (env.now_us_raw() / 1000) as u32;

    loop {
        env.stability.poll(&mut pio);
        log.poll();

        let agg = metrics.aggregate(true);
        let agg_ref = if agg.count > 0 { Some(&agg) } else { None };

        let now_ms = (env.now_us_raw() / 1000) as u32;
        if shared.live_stats() && now_ms.wrapping_sub(last_stat_ms) >= shared.stat_period_ms() {
            let temp_c = env.temperature.read_celsius();
            emit_stat_line(shared, temp_c, &mut log);
            last_stat_ms = now_ms;
        }

        if let Some(g) = registry.current_mut() {
            let t0 = env.now_us_raw();
            g.tick(&mut env, agg_ref);
            let t1 = env.now_us_raw();
            let delta_ms = (t1 - t0) as f64 / 1000.0;

            tick_count += 1;
            tick_avg_ms =
                ((tick_avg_ms * (tick_count - 1) as f64) + delta_ms) / tick_count as f64;

            metrics.publish_kernel_snapshot(KernelSnapshot {
                gov_tick_count: tick_count,
                gov_tick_avg_ms: tick_avg_ms,
                last_ts_ms: now_ms,
            });
        } else {
            ringbuf::ringbuf_entry!(TRACE, Trace::IdleDispatch);
            env.delay_ms(50);
        }

        shared.ping_wdt();
    }
}
