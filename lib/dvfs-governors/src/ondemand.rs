use dvfs_governor::{Governor, GovernorEnv};
use dvfs_metrics::Aggregate;
use dvfs_shared::{MAX_KHZ, MIN_KHZ};

use crate::Trace;

const IDLE_BACKOFF_COOLDOWN_US: u64 = 500_000;

/// Ramps up aggressively on activity, backs off slowly. The original's
/// comment notes temperature doubles as an activity proxy when the caller
/// never submits metrics.
pub struct Ondemand {
    last_idle_backoff_us: u64,
    last_logged_target: u32,
}

impl Ondemand {
    pub const fn new() -> Self {
        Self { last_idle_backoff_us: 0, last_logged_target: 0 }
    }

    fn log_if_changed(&mut self, target: u32, make_trace: impl FnOnce(u32) -> Trace) {
        if target != self.last_logged_target {
            ringbuf::ringbuf_entry!(crate::TRACE, make_trace(target));
            self.last_logged_target = target;
        }
    }
}

impl Default for Ondemand {
    fn default() -> Self {
        Self::new()
    }
}

impl Governor for Ondemand {
    fn name(&self) -> &'static str {
        "ondemand"
    }

    fn init(&mut self, env: &mut dyn GovernorEnv) {
        self.last_idle_backoff_us = env.now_us();
        env.shared().set_target_khz(MIN_KHZ);
        self.last_logged_target = MIN_KHZ;
    }

    fn tick(&mut self, env: &mut dyn GovernorEnv, metrics: Option<&Aggregate>) {
        env.shared().ping_wdt();
        let temp = env.temperature_c();
        let now_us = env.now_us();
        let mut target = env.shared().target_khz();

        let is_idle = metrics.map_or(true, |m| m.count == 0 || m.avg_intensity < 30.0);

        if metrics.is_some_and(|m| m.count > 0 && m.avg_intensity > 70.0) {
            env.prewarm_voltage(MAX_KHZ);
            if target < MAX_KHZ {
                target += 30_000;
            }
            target = target.min(MAX_KHZ);
            self.log_if_changed(target, Trace::OndemandRampUpMetrics);
        } else if !is_idle && temp < 50.0 && target < MAX_KHZ {
            target = (target + 20_000).min(MAX_KHZ);
            self.log_if_changed(target, Trace::OndemandRampUp);
        } else if temp > 65.0 && target > MIN_KHZ {
            target = target.saturating_sub(10_000).max(MIN_KHZ);
            self.log_if_changed(target, Trace::OndemandBackoffHot);
        } else if is_idle
            && temp < 48.0
            && target > MIN_KHZ
            && now_us.saturating_sub(self.last_idle_backoff_us) >= IDLE_BACKOFF_COOLDOWN_US
        {
            target = target.saturating_sub(10_000).max(MIN_KHZ);
            self.last_idle_backoff_us = now_us;
            self.log_if_changed(target, Trace::OndemandIdleBackoff);
        }

        env.shared().set_target_khz(target);
        if target != env.shared().current_khz() {
            env.ramp_step(target);
        }

        env.delay_ms(80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvfs_shared::SharedState;

    struct FakeEnv {
        shared: SharedState,
        temp_c: f32,
        now_us: u64,
    }

    impl GovernorEnv for FakeEnv {
        fn shared(&self) -> &SharedState {
            &self.shared
        }
        fn temperature_c(&mut self) -> f32 {
            self.temp_c
        }
        fn now_us(&mut self) -> u64 {
            self.now_us
        }
        fn delay_ms(&mut self, _ms: u32) {}
        fn ramp_step(&mut self, target_khz: u32) -> bool {
            self.shared.set_current_khz(target_khz);
            true
        }
        fn prewarm_voltage(&mut self, _khz: u32) -> u32 {
            1350
        }
        fn load_tuning(&mut self, _buf: &mut [u8]) -> Option<usize> {
            None
        }
        fn save_tuning(&mut self, _bytes: &[u8]) {}
    }

    fn agg(intensity: f64) -> Aggregate {
        Aggregate { count: 1, avg_workload: 0.0, avg_intensity: intensity, avg_duration_ms: 0.0, last_ts_ms: 0 }
    }

    #[test]
    fn init_starts_at_min() {
        let mut env = FakeEnv { shared: SharedState::new(), temp_c: 30.0, now_us: 0 };
        let mut gov = Ondemand::new();
        gov.init(&mut env);
        assert_eq!(env.shared().target_khz(), MIN_KHZ);
    }

    #[test]
    fn high_intensity_metrics_ramp_up_by_30mhz_and_prewarm() {
        let mut env = FakeEnv { shared: SharedState::new(), temp_c: 30.0, now_us: 0 };
        let mut gov = Ondemand::new();
        gov.init(&mut env);

        gov.tick(&mut env, Some(&agg(85.0)));

        assert_eq!(env.shared().target_khz(), MIN_KHZ + 30_000);
    }

    #[test]
    fn cold_and_moderately_active_ramps_up_by_20mhz() {
        let mut env = FakeEnv { shared: SharedState::new(), temp_c: 40.0, now_us: 0 };
        env.shared.set_target_khz(MIN_KHZ);
        // Moderate intensity keeps is_idle false without tripping the
        // high-activity (>70%) branch above it.
        let mut gov = Ondemand::new();
        gov.init(&mut env);

        gov.tick(&mut env, Some(&agg(50.0)));

        assert_eq!(env.shared().target_khz(), MIN_KHZ + 20_000);
    }

    #[test]
    fn hot_backs_off_by_10mhz_regardless_of_metrics() {
        let mut env = FakeEnv { shared: SharedState::new(), temp_c: 70.0, now_us: 0 };
        env.shared.set_target_khz(200_000);
        let mut gov = Ondemand::new();
        gov.init(&mut env);

        gov.tick(&mut env, None);

        assert_eq!(env.shared().target_khz(), 190_000);
    }

    #[test]
    fn idle_backoff_is_rate_limited_to_the_cooldown_window() {
        let mut env = FakeEnv { shared: SharedState::new(), temp_c: 40.0, now_us: 0 };
        env.shared.set_target_khz(200_000);
        env.shared.set_current_khz(200_000);
        let mut gov = Ondemand::new();
        gov.init(&mut env); // last_idle_backoff_us = 0

        env.now_us = 600_000; // past the 500ms cooldown since init
        gov.tick(&mut env, None); // is_idle (no metrics), cool -> backs off once
        assert_eq!(env.shared().target_khz(), 190_000);

        env.now_us = 700_000; // only 100ms since the backoff above
        gov.tick(&mut env, None);
        assert_eq!(env.shared().target_khz(), 190_000, "second backoff suppressed by cooldown");

        env.now_us = 1_200_000; // 600ms since the last backoff: past cooldown again
        gov.tick(&mut env, None);
        assert_eq!(env.shared().target_khz(), 180_000);
    }

    #[test]
    fn never_drops_below_min_khz() {
        let mut env = FakeEnv { shared: SharedState::new(), temp_c: 40.0, now_us: 0 };
        env.shared.set_target_khz(MIN_KHZ);
        env.shared.set_current_khz(MIN_KHZ);
        let mut gov = Ondemand::new();
        gov.init(&mut env);

        gov.tick(&mut env, None);

        assert_eq!(env.shared().target_khz(), MIN_KHZ);
    }
}
