//! Per-session allocator for correlation ids.
//!
//! Every `query` and `listen` needs an id the peer will echo back in its
//! `Callback` messages.  Ids only have to be unique among the entries that are
//! *currently pending* for one session, but a monotonically increasing counter
//! gives the stronger guarantee that an id is never reused for the lifetime of
//! the session, so a late reply can never be routed to a newer query.
//!
//! # Thread safety
//!
//! The counter is an `AtomicU64`.  Page-building code, event handlers and the
//! broadcast path may all dispatch to the same session concurrently; the
//! atomic `fetch_add` hands each of them a distinct value without a lock.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::ids::CallbackId;

/// Largest integer a JavaScript number represents exactly (2^53 - 1).
///
/// Ids beyond this would be rounded by the peer and fail to correlate, so the
/// counter wraps back to 0 before reaching it.
pub const MAX_SAFE_CALLBACK_ID: CallbackId = (1 << 53) - 1;

/// Thread-safe, monotonically increasing correlation id allocator.
///
/// # Examples
///
/// ```rust
/// use tether_core::protocol::CallbackCounter;
///
/// let counter = CallbackCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct CallbackCounter {
    inner: AtomicU64,
}

impl CallbackCounter {
    /// Creates a counter whose first id is 0.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Returns the next correlation id.
    ///
    /// `Relaxed` ordering is enough: the id is only an identifier, the pending
    /// table that stores it is protected by its own lock.
    pub fn next(&self) -> CallbackId {
        self.inner.fetch_add(1, Ordering::Relaxed) % (MAX_SAFE_CALLBACK_ID + 1)
    }

    /// Number of ids handed out so far (for logging).
    pub fn issued(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}
