//! The only crate in this workspace that touches real silicon.
//!
//! Everything here implements a trait from one of the `no_std` logic
//! crates — `dvfs_ramp::ClockPlatform`, `dvfs_persist::FlashDevice`,
//! `dvfs_stability::PioSource` — plus the onboard temperature sensor and
//! the UART+DMA debug log sink. `task-governor` owns one instance of each
//! and lends them to the logic crates; nothing here knows about governors.
#![cfg_attr(not(test), no_std)]

pub mod clock;
pub mod flash;
pub mod lockout;
pub mod log;
pub mod pio_stats;
pub mod temperature;

pub use clock::Rp2040Clock;
pub use flash::Rp2040Flash;
pub use lockout::Lockout;
pub use log::LogSink;
pub use pio_stats::Rp2040Pio;
pub use temperature::Temperature;

ringbuf::ringbuf!(TRACE, Trace, 16, Trace::None);

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Trace {
    None,
    LockoutEnter,
    LockoutExit,
    FlashWriteStart,
    FlashWriteDone,
    LogDropped,
}
