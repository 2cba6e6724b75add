use dvfs_governor::{Governor, GovernorEnv};
use dvfs_metrics::Aggregate;
use dvfs_shared::MAX_KHZ;

use crate::Trace;

/// Always targets `MAX_KHZ`. Starts at idle and ramps up rather than
/// jumping straight to max, so the transition is still observable and paced
/// like every other policy's.
pub struct Performance {
    last_logged_target: u32,
}

impl Performance {
    pub const fn new() -> Self {
        Self { last_logged_target: 0 }
    }
}

impl Default for Performance {
    fn default() -> Self {
        Self::new()
    }
}

impl Governor for Performance {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn init(&mut self, env: &mut dyn GovernorEnv) {
        env.shared().set_target_khz(dvfs_shared::MIN_KHZ);
        self.last_logged_target = dvfs_shared::MIN_KHZ;
        // Pre-warm voltage for MAX_KHZ up front, even though current_khz
        // starts at MIN_KHZ — this policy always ramps there next, so the
        // rail is already safe for it before the first up-step runs.
        env.prewarm_voltage(MAX_KHZ);
    }

    fn tick(&mut self, env: &mut dyn GovernorEnv, _metrics: Option<&Aggregate>) {
        env.shared().ping_wdt();

        if env.shared().target_khz() != MAX_KHZ {
            env.prewarm_voltage(MAX_KHZ);
            env.shared().set_target_khz(MAX_KHZ);
            if MAX_KHZ != self.last_logged_target {
                ringbuf::ringbuf_entry!(crate::TRACE, Trace::PerformanceToMax);
                self.last_logged_target = MAX_KHZ;
            }
        }

        let target = env.shared().target_khz();
        if target != env.shared().current_khz() {
            env.ramp_step(target);
        }

        env.delay_ms(200);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvfs_shared::{SharedState, MIN_KHZ};

    struct FakeEnv {
        shared: SharedState,
        prewarm_calls: u32,
    }

    impl GovernorEnv for FakeEnv {
        fn shared(&self) -> &SharedState {
            &self.shared
        }
        fn temperature_c(&mut self) -> f32 {
            30.0
        }
        fn now_us(&mut self) -> u64 {
            0
        }
        fn delay_ms(&mut self, _ms: u32) {}
        fn ramp_step(&mut self, target_khz: u32) -> bool {
            self.shared.set_current_khz(target_khz);
            true
        }
        fn prewarm_voltage(&mut self, _khz: u32) -> u32 {
            self.prewarm_calls += 1;
            1350
        }
        fn load_tuning(&mut self, _buf: &mut [u8]) -> Option<usize> {
            None
        }
        fn save_tuning(&mut self, _bytes: &[u8]) {}
    }

    #[test]
    fn init_starts_at_idle_not_max() {
        let mut env = FakeEnv { shared: SharedState::new(), prewarm_calls: 0 };
        let mut gov = Performance::new();
        gov.init(&mut env);
        assert_eq!(env.shared().target_khz(), MIN_KHZ);
    }

    #[test]
    fn init_pre_warms_voltage_for_max() {
        let mut env = FakeEnv { shared: SharedState::new(), prewarm_calls: 0 };
        let mut gov = Performance::new();
        gov.init(&mut env);
        assert_eq!(env.prewarm_calls, 1);
    }

    #[test]
    fn tick_always_targets_max_and_drives_the_ramp() {
        let mut env = FakeEnv { shared: SharedState::new(), prewarm_calls: 0 };
        let mut gov = Performance::new();
        gov.init(&mut env);

        gov.tick(&mut env, None);

        assert_eq!(env.shared().target_khz(), MAX_KHZ);
        assert_eq!(env.shared().current_khz(), MAX_KHZ);
        assert_eq!(env.shared().wdt_ping(), 1);
    }

    #[test]
    fn tick_ignores_metrics_entirely() {
        let mut env = FakeEnv { shared: SharedState::new(), prewarm_calls: 0 };
        let mut gov = Performance::new();
        gov.init(&mut env);

        let agg = Aggregate { count: 1, avg_workload: 0.0, avg_intensity: 0.0, avg_duration_ms: 0.0, last_ts_ms: 0 };
        gov.tick(&mut env, Some(&agg));

        assert_eq!(env.shared().target_khz(), MAX_KHZ);
    }
}
