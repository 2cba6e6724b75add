use dvfs_governor::{Governor, GovernorEnv};
use dvfs_metrics::Aggregate;
use dvfs_shared::{MAX_KHZ, MIN_KHZ};

use crate::Trace;

const IDLE_BACKOFF_COOLDOWN_US: u64 = 500_000;
const IDLE_UTIL_WINDOW_US: u64 = 2_000_000;

/// Tracks an app-reported (or temperature-estimated) utilization percentage
/// and scales frequency linearly between `MIN_KHZ` and `MAX_KHZ`.
pub struct Schedutil {
    last_high_util_us: u64,
    last_idle_backoff_us: u64,
    last_logged_target: u32,
}

impl Schedutil {
    pub const fn new() -> Self {
        Self { last_high_util_us: 0, last_idle_backoff_us: 0, last_logged_target: 0 }
    }
}

impl Default for Schedutil {
    fn default() -> Self {
        Self::new()
    }
}

impl Governor for Schedutil {
    fn name(&self) -> &'static str {
        "schedutil"
    }

    fn init(&mut self, env: &mut dyn GovernorEnv) {
        let now = env.now_us();
        self.last_high_util_us = now;
        self.last_idle_backoff_us = now;
        env.shared().set_target_khz(MIN_KHZ);
        self.last_logged_target = MIN_KHZ;
    }

    fn tick(&mut self, env: &mut dyn GovernorEnv, metrics: Option<&Aggregate>) {
        env.shared().ping_wdt();
        let temp = env.temperature_c();
        let now_us = env.now_us();

        let has_metrics = metrics.is_some_and(|m| m.count > 0);
        let mut util: i32 = match metrics {
            Some(m) if has_metrics => {
                let util = m.avg_intensity as i32;
                if util > 50 {
                    self.last_high_util_us = now_us;
                }
                util
            }
            // Conservative temperature-derived estimate when nothing has
            // been submitted recently.
            _ => ((temp - 32.0) * 0.5) as i32,
        };
        util = util.clamp(0, 100);

        let span = MAX_KHZ - MIN_KHZ;
        let target = (MIN_KHZ + span * util as u32 / 100).clamp(MIN_KHZ, MAX_KHZ);

        let mut current_target = env.shared().target_khz();
        let current_target_percent = ((current_target - MIN_KHZ) * 100 / span) as i32;

        // Hysteresis resolved as a single conjunction: only move when the
        // new utilization differs from the current target's percentage by
        // more than 5 points, either direction.
        if current_target != target && (util - current_target_percent).abs() > 5 {
            current_target = target;
            env.shared().set_target_khz(current_target);
            if current_target != self.last_logged_target {
                ringbuf::ringbuf_entry!(crate::TRACE, Trace::SchedutilTarget(current_target));
                self.last_logged_target = current_target;
            }
        }

        if !has_metrics
            && util < 20
            && temp < 48.0
            && current_target > MIN_KHZ
            && now_us.saturating_sub(self.last_high_util_us) > IDLE_UTIL_WINDOW_US
            && now_us.saturating_sub(self.last_idle_backoff_us) >= IDLE_BACKOFF_COOLDOWN_US
        {
            current_target = current_target.saturating_sub(10_000).max(MIN_KHZ);
            env.shared().set_target_khz(current_target);
            self.last_idle_backoff_us = now_us;
            if current_target != self.last_logged_target {
                ringbuf::ringbuf_entry!(crate::TRACE, Trace::SchedutilIdleBackoff(current_target));
                self.last_logged_target = current_target;
            }
        }

        if current_target > env.shared().current_khz() {
            env.prewarm_voltage(current_target);
        }

        if current_target != env.shared().current_khz() {
            env.ramp_step(current_target);
        }

        env.delay_ms(60);
    }
}
