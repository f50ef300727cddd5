// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing the boot control engines
//!
//! Every engine in this workspace (dispatcher, loader, diagnostics, bank
//! manager) keeps a small fixed-depth trace of interesting events instead of
//! emitting text logs. The trace is an ordinary field of the engine, so each
//! instance has its own history and tests can read it back.
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement both `Copy` and `PartialEq`.
//! The latter is what lets a burst of identical events collapse into a single
//! entry with a count.
//!
//! ## Recording
//!
//! Declare the buffer as a field and record with [`ringbuf_entry!`], which
//! stamps the entry with the source line it was recorded from:
//!
//! ```
//! use ringbuf::{ringbuf_entry, Ringbuf};
//!
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     None,
//!     Strobe(u32),
//! }
//!
//! let mut trace: Ringbuf<Trace, 8> = Ringbuf::new(Trace::None);
//! for _ in 0..2 {
//!     ringbuf_entry!(trace, Trace::Strobe(4));
//! }
//!
//! let last = trace.last_entry().unwrap();
//! assert_eq!(last.payload, Trace::Strobe(4));
//! assert_eq!(last.count, 2);
//! ```
//!
//! ## Reading
//!
//! [`Ringbuf::iter`] walks the live entries from oldest to newest. Each entry
//! carries the `line` it was recorded from, a per-slot `generation` that is
//! bumped whenever the slot is reused, and the `count` of consecutive identical
//! recordings it stands for.

#![cfg_attr(not(test), no_std)]

/// Inserts data into a ring buffer.
///
/// `ringbuf_entry!(buf, expr)` evaluates `expr` first and then records it into
/// `buf`, which must be a place expression of type [`Ringbuf`] (typically a
/// field such as `self.trace`).
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before taking the mutable borrow, so payloads
        // can be built from other fields of the same struct.
        let p = $payload;
        $crate::Ringbuf::entry(&mut $buf, line!() as u16, p);
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.
///
#[derive(Debug, Clone)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    filled: usize,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    /// Creates an empty ring buffer whose unused slots hold `init`.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            filled: 0,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // A fresh buffer has no last entry; treat that as an out-of-range
        // index so the first entry lands in slot 0 and nothing gets counted.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // wrapping_add turns the usize::MAX starting condition into 0.
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let Some(ent) = self.buffer.get_mut(ndx) else {
            // Zero-depth buffer; nothing to record into.
            return;
        };
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
        self.filled = usize::min(self.filled + 1, N);
    }

    /// Returns the most recently recorded entry, if any.
    pub fn last_entry(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|ndx| self.buffer.get(ndx))
    }

    /// Number of live entries (not counting collapsed repeats).
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Iterates over live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        // Until the buffer wraps, live entries occupy 0..filled in order.
        // After that, the oldest entry is the one just past `last`.
        let start = match self.last {
            Some(last) if self.filled == N => last + 1,
            _ => 0,
        };
        (0..self.filled).map(move |i| &self.buffer[(start + i) % N])
    }

    /// Iterates over the payloads of live entries, oldest first.
    pub fn payloads(&self) -> impl Iterator<Item = T> + '_ {
        self.iter().map(|e| e.payload)
    }

    /// Returns true if any live entry carries `payload`.
    pub fn contains(&self, payload: &T) -> bool {
        self.iter().any(|e| e.payload == *payload)
    }
}
