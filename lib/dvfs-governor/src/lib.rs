//! The governor framework: the `Governor`/`GovernorEnv` trait contracts, a
//! fixed-capacity registry, and the current-governor selector with its
//! persisted-name fallback order.
//!
//! Policies themselves (ondemand, schedutil, performance, the RP2040-tuned
//! adaptive governor) live in `dvfs-governors`; this crate only knows how to
//! hold them, pick one, and hand each one a world to act on.
#![cfg_attr(not(test), no_std)]

use dvfs_metrics::Aggregate;
use dvfs_shared::SharedState;

/// Registry capacity. The original's `registry[8]` fixed array; four slots
/// are built-ins, the rest is headroom.
pub const MAX_GOVERNORS: usize = 8;

/// Everything a governor policy can do to the outside world, behind one
/// object-safe trait so `Governor` impls never hold their own `&mut`
/// references to the ramp engine, clock, or temperature sensor (four
/// governors living in one registry would otherwise need four simultaneous
/// mutable borrows of the same hardware).
pub trait GovernorEnv {
    /// Read-only access to the shared cross-core state block.
    fn shared(&self) -> &SharedState;

    /// Current on-board temperature, degrees Celsius.
    fn temperature_c(&mut self) -> f32;

    /// Free-running microsecond clock, used for cooldown/backoff timers.
    fn now_us(&mut self) -> u64;

    /// Pace the caller: each policy's tick is the whole body of one loop
    /// iteration in the original, ended by its own `sleep_ms`.
    fn delay_ms(&mut self, ms: u32);

    /// Advance one ramp step toward `target_khz`. Returns `true` once
    /// `current_khz` has reached it.
    fn ramp_step(&mut self, target_khz: u32) -> bool;

    /// Pre-warm the voltage rail for an upcoming frequency, ahead of issuing
    /// the ramp itself (used by `performance`'s immediate jump to max and
    /// `ondemand`'s large up-steps). Returns the millivolt value applied.
    fn prewarm_voltage(&mut self, khz: u32) -> u32;

    /// Load a previously persisted tuning blob into `buf`, returning the
    /// number of bytes written, or `None` if nothing has been saved yet.
    fn load_tuning(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Persist a tuning blob (the RP2040-tuned adaptive governor's runtime
    /// parameters).
    fn save_tuning(&mut self, bytes: &[u8]);
}

/// A selectable scaling policy.
///
/// `tick` is called once per governor-core iteration with the latest
/// aggregated metrics (`None` when the metrics pipeline has nothing new
/// since the last tick) and does whatever that policy does: read the
/// aggregate, decide a target frequency, and drive the ramp engine through
/// `env`.
pub trait Governor {
    fn name(&self) -> &'static str;

    /// Called once, immediately after becoming the current governor.
    fn init(&mut self, env: &mut dyn GovernorEnv);

    fn tick(&mut self, env: &mut dyn GovernorEnv, metrics: Option<&Aggregate>);

    /// Write a short human-readable status line into `buf`, return the
    /// number of bytes written. Default: nothing written.
    fn export_stats(&self, buf: &mut [u8]) -> usize {
        let _ = buf;
        0
    }
}

/// Fixed-capacity registry of governors plus a current-selection pointer.
///
/// Generic over the lifetime `'r` of the governors it holds rather than
/// hard-coding `'static`: the registry itself is owned by the governor-core
/// task for the program's entire run, so whatever it borrows its governors
/// from (locals in a `-> !` entry function, or `StaticCell`-backed statics)
/// only needs to outlive the registry, not literally be `'static`.
pub struct Registry<'r> {
    slots: [Option<&'r mut dyn Governor>; MAX_GOVERNORS],
    len: usize,
    current: Option<usize>,
}

impl<'r> Registry<'r> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            len: 0,
            current: None,
        }
    }

    /// Add a governor to the registry. Returns `false` (the caller keeps its
    /// reference) if the registry is already full.
    pub fn register(&mut self, g: &'r mut dyn Governor) -> bool {
        if self.len >= MAX_GOVERNORS {
            return false;
        }
        self.slots[self.len] = Some(g);
        self.len += 1;
        true
    }

    pub fn count(&self) -> usize {
        self.len
    }

    pub fn get(&self, i: usize) -> Option<&dyn Governor> {
        self.slots.get(i)?.as_deref()
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        (0..self.len).find(|&i| self.slots[i].as_deref().is_some_and(|g| g.name() == name))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_name(&self) -> Option<&'static str> {
        self.current
            .and_then(|i| self.slots[i].as_deref())
            .map(Governor::name)
    }

    pub fn current_mut(&mut self) -> Option<&mut dyn Governor> {
        let i = self.current?;
        self.slots[i].as_deref_mut()
    }

    /// Select the governor at `idx` as current, calling its `init()`.
    /// Returns `false` if `idx` is out of range.
    pub fn set_current(&mut self, idx: usize, env: &mut dyn GovernorEnv) -> bool {
        if idx >= self.len {
            return false;
        }
        if let Some(g) = self.slots[idx].as_deref_mut() {
            g.init(env);
        }
        self.current = Some(idx);
        true
    }

    /// Mirrors the original's boot-time selection order: the persisted
    /// governor name, if any and if it's still registered; otherwise
    /// `preferred_name` (the RP2040-tuned adaptive governor, in practice);
    /// otherwise whatever was registered first. A no-op, returning `false`,
    /// if nothing is registered at all.
    pub fn select_initial(
        &mut self,
        persisted_name: Option<&str>,
        preferred_name: &str,
        env: &mut dyn GovernorEnv,
    ) -> bool {
        if self.len == 0 {
            return false;
        }
        let idx = persisted_name
            .and_then(|n| self.find_by_name(n))
            .or_else(|| self.find_by_name(preferred_name))
            .unwrap_or(0);
        self.set_current(idx, env)
    }
}

impl<'r> Default for Registry<'r> {
    fn default() -> Self {
        Self::new()
    }
}
