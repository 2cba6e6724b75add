// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for debugging governor-core and ramp-engine activity.
//!
//! This contains an implementation for a static ring buffer designed to be used
//! to instrument arbitrary contexts. While there is nothing to prevent these
//! ring buffers from being left in production code, the design center is
//! primarily around debugging in development: the ring buffers can be
//! inspected with a debugger after the fact.
//!
//! ## Constraints
//!
//! The main constraint for a ring buffer is that the type in the ring buffer
//! must implement [`Copy`]. If [de-duplication](#entry-de-duplication) is
//! enabled, the entry type must also implement [`PartialEq`].
//!
//! If you use the variants of the `ringbuf!` macro that leave the name of the
//! data structure implicit, you can only have one per module. (You can lift
//! this constraint by providing a name.)
//!
//! A given ring buffer must only ever be written from one core. Two cores
//! racing on [`RecordEntry::record_entry`] for the same buffer will panic
//! (the underlying [`StaticCell`] only permits one borrower at a time) rather
//! than corrupt memory, but that's still not something to rely on: keep
//! per-core buffers separate.
//!
//! ## Creating a ring buffer
//!
//! Ring buffers are instantiated with the [`ringbuf!`] macro, to which one
//! must provide the type of per-entry payload, the number of entries, and a
//! static initializer. For example, to define a 16-entry ring buffer with
//! each entry containing a [`core::u32`].
//!
//! ```
//! ringbuf!(u32, 16, 0);
//! ```
//!
//! Ring buffer entries are generated with [`ringbuf_entry!`] specifying a
//! payload of the appropriate type, e.g.:
//!
//! ```
//! ringbuf_entry!(isr.bits());
//! ```
//!
//! You can also provide a name for the ring buffer, to distinguish between them
//! if you have more than one:
//!
//! ```
//! ringbuf!(MY_RINGBUF, u32, 16, 0);
//!
//! // ...
//!
//! ringbuf_entry!(MY_RINGBUF, isr.bits());
//! ```
//!
//! ### Entry de-duplication
//!
//! By default, when the same value is recorded in a ring buffer multiple times
//! in a row, the subsequent entries are recorded by incrementing a counter
//! stored in the initial entry, rather than by adding new entries to the
//! ringbuf. This de-duplication prevents the ring buffer from filling up with a
//! large number of duplicate entries, allowing the earlier history to be
//! recorded.
//!
//! However, this de-duplication requires the entry type to implement the
//! [`PartialEq`] trait, and performs a comparison with the previous entry
//! whenever an entry is recorded. Code which does not record a large number of
//! duplicate entries, or which does not care about de-duplicating them, can
//! disable de-duplication by adding the `no_dedup` argument at the end of the
//! [`ringbuf!`] macro. For example:
//!
//! ```
//! ringbuf!(u32, 16, 0, no_dedup);
//! ```
#![no_std]

/// Re-export the bits we use from `static_cell` so that code generated by the
/// macros is guaranteed to be able to find them.
pub use static_cell::StaticCell;

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr, no_dedup) => {
        $crate::ringbuf!($name, $t, $n, $init)
    };
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
        static $name: () = ();
    };
    ($t:ty, $n:expr, $init:expr, no_dedup) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The resulting ringbuffer will be static, so `NAME` should be uppercase.
///
/// The actual type of `name` will be `StaticCell<Ringbuf<T, N>>`.
///
/// To support the common case of having one quickly-installed ringbuffer per
/// module, if you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        static $name: $crate::StaticCell<$crate::Ringbuf<$t, u16, $n>> =
            $crate::StaticCell::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: $init,
                }; $n],
            });
    };
    ($name:ident, $t:ty, $n:expr, $init:expr, no_dedup) => {
        static $name: $crate::StaticCell<$crate::Ringbuf<$t, (), $n>> =
            $crate::StaticCell::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: (),
                    payload: $init,
                }; $n],
            });
    };
    ($t:ty, $n:expr, $init:expr, no_dedup) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init, no_dedup);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the [`ringbuf!`] macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`.
///
/// If you declared your ringbuffer without a name, you can also use this
/// without a name, and it will default to `__RINGBUF`.
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both buf and payload, without letting them access each
        // other, by evaluating them in a tuple where each cannot
        // accidentally use the other's binding.
        let (p, buf) = ($payload, &$buf);
        // Invoke these functions using slightly weird syntax to avoid
        // accidentally calling a _different_ routine called record_entry.
        $crate::RecordEntry::record_entry(buf, line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

/// Inserts data into a ringbuffer at the root of this crate (which should have
/// been declared with the [`ringbuf!`] macro).
#[allow(clippy::crate_in_macro_def)]
#[macro_export]
macro_rules! ringbuf_entry_root {
    ($payload:expr) => {
        $crate::ringbuf_entry!(crate::__RINGBUF, $payload);
    };
    ($buf:ident, $payload:expr) => {
        $crate::ringbuf_entry!(crate::$buf, $payload);
    };
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type. When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy, C> {
    pub line: u16,
    pub generation: u16,
    pub payload: T,
    pub count: C,
}

///
/// A ring buffer of parametrized type and size. In practice, instantiating
/// this directly is strange -- see the [`ringbuf!`] macro.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy, C, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T, C>; N],
}

///
/// An abstraction over types in which ring buffer entries can be recorded.
///
/// This trait allows the [`ringbuf_entry!`] and [`ringbuf_entry_root!`] macros
/// to record entries in both in ring buffers with and without de-duplication.
/// It's typically unnecessary to implement this trait for other types, as its
/// only purpose is to allow the macros to dispatch based on which ringbuf
/// flavor is being used.
pub trait RecordEntry<T: Copy> {
    /// Record a `T`-typed entry in this ringbuf. The `line` parameter should be
    /// the source code line on which the entry was recorded.
    fn record_entry(&self, line: u16, payload: T);
}

impl<T: Copy + PartialEq, const N: usize> RecordEntry<T>
    for StaticCell<Ringbuf<T, u16, { N }>>
{
    fn record_entry(&self, line: u16, payload: T) {
        // If the ringbuf is already borrowed, just do nothing, to avoid
        // panicking. This *shouldn't* ever happen since each ringbuf is
        // written from a single core, but there's no nice way to guarantee
        // it from in here.
        let Some(mut ring) = self.try_borrow_mut() else {
            return;
        };
        let last = ring.last.unwrap_or(usize::MAX);

        if let Some(ent) = ring.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        ring.do_record(last, line, 1, payload);
    }
}

impl<T: Copy, const N: usize> RecordEntry<T> for StaticCell<Ringbuf<T, (), { N }>> {
    fn record_entry(&self, line: u16, payload: T) {
        let Some(mut ring) = self.try_borrow_mut() else {
            return;
        };
        let last = ring.last.unwrap_or(usize::MAX);
        ring.do_record(last, line, (), payload);
    }
}

impl<T> RecordEntry<T> for ()
where
    T: Copy + PartialEq,
{
    fn record_entry(&self, _: u16, _: T) {}
}

impl<T: Copy, C, const N: usize> Ringbuf<T, C, N> {
    fn do_record(&mut self, last: usize, line: u16, count: C, payload: T) {
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            // None of our target platforms have hardware modulus, and many
            // don't have hardware divide either, so avoid `%` here.
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };
        let ent = unsafe {
            // Safety: `ndx` was just checked against `self.buffer.len()`
            // above, so unchecked indexing here elides a redundant bounds
            // check.
            self.buffer.get_unchecked_mut(ndx)
        };
        *ent = RingbufEntry {
            line,
            payload,
            count,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }
}
