//! Metrics ingestion and aggregation.
//!
//! A fixed-capacity power-of-two ring buffer behind a `critical_section`
//! mutex, plus a one-slot "kernel snapshot" channel the governor-core tick
//! loop publishes its own timing statistics into.
#![cfg_attr(not(test), no_std)]

use core::cell::RefCell;
use critical_section::Mutex;

/// Ring buffer capacity. Power of two so index wrap is a mask, not a modulo.
pub const CAPACITY: usize = 128;

#[derive(Clone, Copy, Debug, Default)]
struct Sample {
    workload: u32,
    intensity: u32,
    duration_ms: u32,
    ts_ms: u32,
}

/// Aggregated statistics over a window of submitted samples.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aggregate {
    pub count: u32,
    pub avg_workload: f64,
    pub avg_intensity: f64,
    pub avg_duration_ms: f64,
    pub last_ts_ms: u32,
}

/// The governor-core tick loop's own running statistics, published for
/// introspection. Considered valid only once `gov_tick_count > 0`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KernelSnapshot {
    pub gov_tick_count: u32,
    pub gov_tick_avg_ms: f64,
    pub last_ts_ms: u32,
}

struct Ring {
    buf: [Sample; CAPACITY],
    head: usize,
    tail: usize,
    count: usize,
}

impl Ring {
    const fn new() -> Self {
        Self {
            buf: [Sample {
                workload: 0,
                intensity: 0,
                duration_ms: 0,
                ts_ms: 0,
            }; CAPACITY],
            head: 0,
            tail: 0,
            count: 0,
        }
    }
}

/// The metrics pipeline singleton. Submitters (application/benchmark code)
/// and the governor core's consumer share one instance via a shared
/// reference; all access goes through `critical_section`, which on
/// `drv/rp2040-platform` is backed by a real hardware spinlock rather than
/// mere interrupt masking, since submitters may run on either core.
pub struct MetricsPipeline {
    ring: Mutex<RefCell<Ring>>,
    kernel: Mutex<RefCell<Option<KernelSnapshot>>>,
}

impl MetricsPipeline {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(RefCell::new(Ring::new())),
            kernel: Mutex::new(RefCell::new(None)),
        }
    }

    /// Insert a sample, overwriting the oldest one if the buffer is full.
    pub fn submit(&self, workload: u32, intensity: u32, duration_ms: u32, ts_ms: u32) {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow(cs).borrow_mut();
            let head = ring.head;
            ring.buf[head] = Sample {
                workload,
                intensity,
                duration_ms,
                ts_ms,
            };
            ring.head = (head + 1) & (CAPACITY - 1);
            if ring.count < CAPACITY {
                ring.count += 1;
            } else {
                ring.tail = ring.head;
            }
        });
    }

    /// Compute the aggregate over all currently-held samples. If `consume`
    /// is set, the buffer is emptied as part of the same critical section.
    pub fn aggregate(&self, consume: bool) -> Aggregate {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow(cs).borrow_mut();
            let n = ring.count;
            if n == 0 {
                return Aggregate::default();
            }

            let mut sum_workload: u64 = 0;
            let mut sum_intensity: u64 = 0;
            let mut sum_duration: u64 = 0;
            let mut last_ts_ms = 0;

            let mut idx = ring.tail;
            for _ in 0..n {
                let s = ring.buf[idx];
                sum_workload += u64::from(s.workload);
                sum_intensity += u64::from(s.intensity);
                sum_duration += u64::from(s.duration_ms);
                last_ts_ms = s.ts_ms;
                idx = (idx + 1) & (CAPACITY - 1);
            }

            if consume {
                ring.head = 0;
                ring.tail = 0;
                ring.count = 0;
            }

            Aggregate {
                count: n as u32,
                avg_workload: sum_workload as f64 / n as f64,
                avg_intensity: sum_intensity as f64 / n as f64,
                avg_duration_ms: sum_duration as f64 / n as f64,
                last_ts_ms,
            }
        })
    }

    /// Replace the published kernel snapshot.
    pub fn publish_kernel_snapshot(&self, snap: KernelSnapshot) {
        critical_section::with(|cs| {
            *self.kernel.borrow(cs).borrow_mut() = Some(snap);
        });
    }

    /// Fetch the latest kernel snapshot, if at least one tick has ever been
    /// recorded.
    pub fn kernel_snapshot(&self) -> Option<KernelSnapshot> {
        critical_section::with(|cs| *self.kernel.borrow(cs).borrow())
    }
}

impl Default for MetricsPipeline {
    fn default() -> Self {
        Self::new()
    }
}
