//! Cross-core halt primitive for PLL reconfiguration and flash writes.
//!
//! The original's `multicore_lockout_start/end_blocking` rides on the
//! inter-core FIFO and a victim IRQ handler. Nothing else in this firmware
//! uses interrupts — every subsystem here is polled cooperatively — so this
//! is a two-phase flag handshake instead: the requesting core sets a
//! request flag and spins for an ack; the victim core's own loop checks the
//! flag once per iteration and parks until released.
use core::sync::atomic::{AtomicBool, Ordering};

use crate::Trace;

/// Shared between both cores. One instance, `'static`, owned by
/// `app/dual-core-governor` and handed to both `task-governor` (as
/// requester) and `task-liveness` (as victim).
pub struct Lockout {
    requested: AtomicBool,
    acked: AtomicBool,
}

impl Lockout {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            acked: AtomicBool::new(false),
        }
    }

    /// Request the sibling core halt, and block until it has acknowledged.
    /// Call this immediately before a PLL reconfiguration or flash write.
    pub fn start_blocking(&self) {
        ringbuf::ringbuf_entry!(crate::TRACE, Trace::LockoutEnter);
        self.requested.store(true, Ordering::Release);
        while !self.acked.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }

    /// Release the sibling core and block until it has resumed.
    pub fn end_blocking(&self) {
        self.requested.store(false, Ordering::Release);
        while self.acked.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        ringbuf::ringbuf_entry!(crate::TRACE, Trace::LockoutExit);
    }

    /// Called once per iteration by the sibling (victim) core's own loop.
    /// Parks here for the duration of the lockout if one is requested;
    /// otherwise returns immediately.
    pub fn poll_as_victim(&self) {
        if !self.requested.load(Ordering::Acquire) {
            return;
        }
        self.acked.store(true, Ordering::Release);
        while self.requested.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        self.acked.store(false, Ordering::Release);
    }
}

impl Default for Lockout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn victim_acks_and_parks_until_released() {
        let lockout = std::sync::Arc::new(Lockout::new());
        let victim = lockout.clone();
        let parked = std::sync::Arc::new(AtomicBool::new(false));
        let parked_writer = parked.clone();

        let handle = std::thread::spawn(move || {
            // Victim's own loop calling poll_as_victim() once per iteration.
            loop {
                victim.poll_as_victim();
                if parked_writer.load(Ordering::Relaxed) {
                    break;
                }
            }
        });

        lockout.start_blocking();
        parked.store(true, Ordering::Relaxed);
        lockout.end_blocking();
        handle.join().unwrap();
    }
}
