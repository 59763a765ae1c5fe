//! Call id allocation.
//!
//! Every call on a channel is tagged with a call id so that responses,
//! stream items and cancellations can be matched to the call that caused
//! them.  Id 0 is reserved for connection-level frames (metadata), so the
//! counter starts at 1 and skips 0 when it wraps.
//!
//! # Thread safety
//!
//! The counter is an `AtomicU64`.  Calls are started from many threads at
//! once (input handlers, the keep-alive task, stream subscriptions), and an
//! atomic `fetch_add` hands each of them a distinct id without a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe source of non-zero call ids.
///
/// # Examples
///
/// ```rust
/// use mirror_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next call id.  Never returns 0.
    pub fn next(&self) -> u64 {
        loop {
            // Relaxed is enough: ids only need to be unique, not ordered
            // with respect to other memory.
            let id = self.inner.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// The id the next call to [`next`](Self::next) would return, for diagnostics.
    pub fn peek(&self) -> u64 {
        self.inner.load(Ordering::Relaxed).max(1)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
