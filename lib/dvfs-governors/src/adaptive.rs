use dvfs_governor::{Governor, GovernorEnv};
use dvfs_metrics::Aggregate;
use dvfs_shared::MAX_KHZ;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::Trace;

/// The RP2040-tuned governor's runtime-adjustable parameters. Round-trips
/// through `GovernorEnv::{load,save}_tuning` as raw bytes; `f32` rather than
/// the original's `double` so the whole blob fits comfortably under
/// `dvfs_persist::MAX_TUNING_LEN` (52 bytes used of 64 available) — the
/// precision double bought on desktop doesn't buy anything on an M0+ doing
/// threshold comparisons.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct AdaptiveParams {
    pub cooldown_ms: u32,
    pub ramp_up_cooldown_ms: u32,
    pub thr_high_intensity: f32,
    pub thr_med_intensity: f32,
    pub thr_low_intensity: f32,
    pub dur_high_ms: f32,
    pub dur_med_ms: f32,
    pub dur_short_ms: f32,
    pub temp_backoff_c: f32,
    pub temp_restore_c: f32,
    pub backoff_target_khz: u32,
    pub idle_target_khz: u32,
    pub idle_timeout_ms: u32,
}

impl AdaptiveParams {
    pub const fn defaults() -> Self {
        Self {
            cooldown_ms: 2000,
            ramp_up_cooldown_ms: 500,
            thr_high_intensity: 80.0,
            thr_med_intensity: 60.0,
            thr_low_intensity: 20.0,
            dur_high_ms: 500.0,
            dur_med_ms: 250.0,
            dur_short_ms: 200.0,
            temp_backoff_c: 72.0,
            temp_restore_c: 65.0,
            backoff_target_khz: 200_000,
            idle_target_khz: 100_000,
            idle_timeout_ms: 5000,
        }
    }

    /// Sanity bounds lifted from the original's CLI setter (everything else
    /// it left unvalidated stays unvalidated here too).
    pub fn validate(&self) -> Result<(), AdaptiveParamError> {
        if !(100..=5000).contains(&self.ramp_up_cooldown_ms) {
            return Err(AdaptiveParamError::RampUpCooldownOutOfRange);
        }
        if self.backoff_target_khz < dvfs_shared::MIN_KHZ || self.backoff_target_khz > MAX_KHZ {
            return Err(AdaptiveParamError::TargetOutOfRange);
        }
        if self.idle_target_khz < dvfs_shared::MIN_KHZ || self.idle_target_khz > MAX_KHZ {
            return Err(AdaptiveParamError::TargetOutOfRange);
        }
        if !(1000..=60_000).contains(&self.idle_timeout_ms) {
            return Err(AdaptiveParamError::IdleTimeoutOutOfRange);
        }
        Ok(())
    }
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveParamError {
    RampUpCooldownOutOfRange,
    TargetOutOfRange,
    IdleTimeoutOutOfRange,
}

/// RP2040-tuned high-performance governor: reach `MAX_KHZ` aggressively but
/// safely, pre-warm voltage ahead of ramps, back off fast on heat, and keep
/// every tick short and cooperative.
pub struct Adaptive {
    params: AdaptiveParams,
    last_adjust_ms: u32,
    last_target_set: u32,
    adjust_count: u32,
    idle_switch_count: u32,
    last_idle_ms: u32,
    last_activity_ms: u32,
    in_idle_state: bool,
}

impl Adaptive {
    pub const fn new() -> Self {
        Self {
            params: AdaptiveParams::defaults(),
            last_adjust_ms: 0,
            last_target_set: 0,
            adjust_count: 0,
            idle_switch_count: 0,
            last_idle_ms: 0,
            last_activity_ms: 0,
            in_idle_state: false,
        }
    }

    pub fn params(&self) -> AdaptiveParams {
        self.params
    }

    pub fn set_params(
        &mut self,
        env: &mut dyn GovernorEnv,
        params: AdaptiveParams,
    ) -> Result<(), AdaptiveParamError> {
        params.validate()?;
        self.params = params;
        env.save_tuning(params.as_bytes());
        Ok(())
    }

    pub fn adjust_count(&self) -> u32 {
        self.adjust_count
    }

    pub fn idle_switch_count(&self) -> u32 {
        self.idle_switch_count
    }

    pub fn is_idle(&self) -> bool {
        self.in_idle_state
    }
}

impl Default for Adaptive {
    fn default() -> Self {
        Self::new()
    }
}

impl Governor for Adaptive {
    fn name(&self) -> &'static str {
        "rp2040_perf"
    }

    fn init(&mut self, env: &mut dyn GovernorEnv) {
        let mut buf = [0u8; core::mem::size_of::<AdaptiveParams>()];
        if let Some(len) = env.load_tuning(&mut buf) {
            if len == buf.len() {
                if let Ok(loaded) = AdaptiveParams::read_from_bytes(&buf) {
                    self.params = loaded;
                }
            }
        }

        env.prewarm_voltage(MAX_KHZ);

        env.shared().set_target_khz(self.params.idle_target_khz);
        self.last_activity_ms = (env.now_us() / 1000) as u32;
        self.in_idle_state = true;
    }

    fn tick(&mut self, env: &mut dyn GovernorEnv, metrics: Option<&Aggregate>) {
        env.shared().ping_wdt();
        let now_ms = (env.now_us() / 1000) as u32;
        let samples = metrics.map_or(0, |m| m.count);
        let agg = metrics.copied().unwrap_or_default();
        let mut target = env.shared().target_khz();

        if samples > 0 {
            self.last_activity_ms = now_ms;
        }

        if samples > 0 && now_ms.wrapping_sub(self.last_adjust_ms) > self.params.cooldown_ms {
            self.tick_with_metrics(env, &agg, now_ms, &mut target);
        } else if samples == 0 && !self.in_idle_state {
            let inactivity_ms = now_ms.wrapping_sub(self.last_activity_ms);
            if inactivity_ms >= self.params.idle_timeout_ms
                && now_ms.wrapping_sub(self.last_adjust_ms) > self.params.cooldown_ms
            {
                target = self.params.idle_target_khz;
                self.commit_adjustment(target, now_ms, true);
                ringbuf::ringbuf_entry!(crate::TRACE, Trace::AdaptiveIdleTimeout(target));
            }
        }

        let temp = env.temperature_c();
        if temp > self.params.temp_backoff_c && target > self.params.backoff_target_khz {
            target = self.params.backoff_target_khz;
            self.in_idle_state = false;
            self.last_adjust_ms = now_ms;
            self.last_target_set = target;
            self.adjust_count += 1;
            ringbuf::ringbuf_entry!(crate::TRACE, Trace::AdaptiveThermalBackoff(target));
        } else if temp < self.params.temp_restore_c && target < MAX_KHZ && !self.in_idle_state {
            target = MAX_KHZ;
            ringbuf::ringbuf_entry!(crate::TRACE, Trace::AdaptiveRestoreMax);
        }

        env.shared().set_target_khz(target);
        if target != env.shared().current_khz() {
            env.ramp_step(target);
        }

        env.delay_ms(40);
    }
}

impl Adaptive {
    fn commit_adjustment(&mut self, target: u32, now_ms: u32, idle: bool) {
        self.last_adjust_ms = now_ms;
        self.last_target_set = target;
        self.adjust_count += 1;
        if idle {
            self.last_idle_ms = now_ms;
            self.idle_switch_count += 1;
            self.in_idle_state = true;
        }
    }

    fn tick_with_metrics(
        &mut self,
        env: &mut dyn GovernorEnv,
        agg: &Aggregate,
        now_ms: u32,
        target: &mut u32,
    ) {
        let p = &self.params;
        let high_activity = agg.avg_intensity >= 90.0
            || (agg.avg_intensity >= p.thr_high_intensity as f64 && agg.avg_duration_ms >= p.dur_high_ms as f64);

        if self.in_idle_state && high_activity {
            self.in_idle_state = false;
            env.prewarm_voltage(MAX_KHZ);
            ringbuf::ringbuf_entry!(crate::TRACE, Trace::AdaptiveExitIdle);
        }

        let mut new_target = *target;
        let mut should_be_idle = false;
        let is_ramp_up;

        if high_activity {
            new_target = MAX_KHZ;
            is_ramp_up = new_target > *target;
        } else if agg.avg_intensity >= p.thr_med_intensity as f64 && agg.avg_duration_ms >= p.dur_med_ms as f64 {
            new_target = MAX_KHZ.min(230_000);
            is_ramp_up = new_target > *target;
        } else if agg.avg_intensity <= p.thr_low_intensity as f64 && agg.avg_duration_ms < p.dur_short_ms as f64 {
            new_target = p.idle_target_khz;
            should_be_idle = true;
            is_ramp_up = false;
        } else if agg.avg_intensity <= 40.0 {
            new_target = p.idle_target_khz;
            should_be_idle = true;
            is_ramp_up = false;
        } else {
            is_ramp_up = false;
        }

        let effective_cooldown = if is_ramp_up && !self.in_idle_state {
            self.params.ramp_up_cooldown_ms
        } else {
            self.params.cooldown_ms
        };

        if new_target != *target && now_ms.wrapping_sub(self.last_adjust_ms) > effective_cooldown {
            let trace = if new_target > *target {
                Trace::AdaptiveRampUpMetrics(new_target)
            } else if should_be_idle {
                Trace::AdaptiveToIdle(new_target)
            } else {
                Trace::AdaptiveRampUpMedium(new_target)
            };
            *target = new_target;
            self.commit_adjustment(new_target, now_ms, should_be_idle);
            ringbuf::ringbuf_entry!(crate::TRACE, trace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvfs_shared::{SharedState, MIN_KHZ};

    struct FakeEnv {
        shared: SharedState,
        temp_c: f32,
        now_us: u64,
        tuning: Option<std::vec::Vec<u8>>,
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
        fn load_tuning(&mut self, buf: &mut [u8]) -> Option<usize> {
            let saved = self.tuning.as_ref()?;
            let n = saved.len().min(buf.len());
            buf[..n].copy_from_slice(&saved[..n]);
            Some(n)
        }
        fn save_tuning(&mut self, bytes: &[u8]) {
            self.tuning = Some(bytes.to_vec());
        }
    }

    fn fresh_env() -> FakeEnv {
        FakeEnv { shared: SharedState::new(), temp_c: 30.0, now_us: 0, tuning: None }
    }

    fn agg(intensity: f64, duration_ms: f64) -> Aggregate {
        Aggregate { count: 1, avg_workload: 0.0, avg_intensity: intensity, avg_duration_ms: duration_ms, last_ts_ms: 0 }
    }

    #[test]
    fn params_struct_fits_under_the_tuning_blob_limit() {
        assert!(core::mem::size_of::<AdaptiveParams>() <= 64);
    }

    #[test]
    fn init_starts_idle_at_the_configured_idle_target() {
        let mut env = fresh_env();
        let mut gov = Adaptive::new();
        gov.init(&mut env);
        assert_eq!(env.shared().target_khz(), AdaptiveParams::defaults().idle_target_khz);
        assert!(gov.is_idle());
    }

    #[test]
    fn init_loads_a_previously_saved_tuning_blob() {
        let mut env = fresh_env();
        let custom = AdaptiveParams { idle_target_khz: 150_000, ..AdaptiveParams::defaults() };
        env.tuning = Some(custom.as_bytes().to_vec());

        let mut gov = Adaptive::new();
        gov.init(&mut env);

        assert_eq!(gov.params().idle_target_khz, 150_000);
        assert_eq!(env.shared().target_khz(), 150_000);
    }

    #[test]
    fn set_params_rejects_out_of_range_ramp_up_cooldown() {
        let mut env = fresh_env();
        let mut gov = Adaptive::new();
        gov.init(&mut env);

        let bad = AdaptiveParams { ramp_up_cooldown_ms: 50, ..AdaptiveParams::defaults() };
        assert_eq!(gov.set_params(&mut env, bad), Err(AdaptiveParamError::RampUpCooldownOutOfRange));
    }

    #[test]
    fn set_params_persists_a_valid_update() {
        let mut env = fresh_env();
        let mut gov = Adaptive::new();
        gov.init(&mut env);

        let good = AdaptiveParams { cooldown_ms: 3000, ..AdaptiveParams::defaults() };
        assert_eq!(gov.set_params(&mut env, good), Ok(()));
        assert!(env.tuning.is_some());
        assert_eq!(gov.params().cooldown_ms, 3000);
    }

    #[test]
    fn sustained_high_intensity_jumps_to_max_and_exits_idle() {
        let mut env = fresh_env();
        let mut gov = Adaptive::new();
        gov.init(&mut env);
        env.now_us = 3_000_000; // past the 2s default cooldown since init's now_us=0

        gov.tick(&mut env, Some(&agg(85.0, 600.0)));

        assert_eq!(env.shared().target_khz(), MAX_KHZ);
        assert!(!gov.is_idle());
    }

    #[test]
    fn medium_sustained_load_steps_to_the_intermediate_target() {
        let mut env = fresh_env();
        let mut gov = Adaptive::new();
        gov.init(&mut env);
        env.now_us = 3_000_000;

        gov.tick(&mut env, Some(&agg(65.0, 300.0)));

        assert_eq!(env.shared().target_khz(), 230_000);
    }

    #[test]
    fn light_short_workload_drops_to_idle_target() {
        let mut env = fresh_env();
        let mut gov = Adaptive::new();
        gov.init(&mut env);
        env.now_us = 3_000_000;
        env.shared.set_target_khz(MAX_KHZ);

        gov.tick(&mut env, Some(&agg(10.0, 50.0)));

        assert_eq!(env.shared().target_khz(), AdaptiveParams::defaults().idle_target_khz);
        assert!(gov.is_idle());
    }

    #[test]
    fn extended_inactivity_forces_idle_even_without_a_fresh_sample() {
        let mut env = fresh_env();
        let mut gov = Adaptive::new();
        gov.init(&mut env);
        env.shared.set_target_khz(MAX_KHZ);
        gov.tick(&mut env, Some(&agg(95.0, 600.0))); // establish activity, exit idle
        assert!(!gov.is_idle());

        env.now_us = 10_000_000; // 10s with no metrics: past idle_timeout_ms (5s default)
        gov.tick(&mut env, None);

        assert_eq!(env.shared().target_khz(), AdaptiveParams::defaults().idle_target_khz);
        assert!(gov.is_idle());
    }

    #[test]
    fn thermal_backoff_overrides_everything_else() {
        let mut env = fresh_env();
        let mut gov = Adaptive::new();
        gov.init(&mut env);
        env.shared.set_target_khz(MAX_KHZ);
        env.temp_c = 80.0;

        gov.tick(&mut env, None);

        assert_eq!(env.shared().target_khz(), AdaptiveParams::defaults().backoff_target_khz);
    }

    #[test]
    fn cooling_below_restore_threshold_restores_max_when_not_idle() {
        let mut env = fresh_env();
        let mut gov = Adaptive::new();
        gov.init(&mut env);
        env.now_us = 3_000_000;
        gov.tick(&mut env, Some(&agg(95.0, 600.0))); // exit idle, ramp toward MAX
        env.shared.set_target_khz(200_000);
        env.temp_c = 50.0; // below temp_restore_c (65.0)

        gov.tick(&mut env, None);

        assert_eq!(env.shared().target_khz(), MAX_KHZ);
    }

    #[test]
    fn never_touches_min_khz_floor_without_cause() {
        let mut env = fresh_env();
        let mut gov = Adaptive::new();
        gov.init(&mut env);
        assert!(env.shared().target_khz() >= MIN_KHZ);
    }
}
