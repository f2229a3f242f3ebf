//! Time sources.
//!
//! Two distinct clocks are needed: a wall-clock milliseconds source for
//! deadlines that must be meaningful across process restarts, and a
//! monotonic nanosecond source for UUID/timestamp construction and for
//! bounding idle waits. [`Clock`] keeps them as two methods on one trait so
//! a single object is threaded through the Framer, but the two values are
//! never derived from one another.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Source of wall-clock milliseconds and a monotonic nanosecond counter.
pub trait Clock: Send {
    /// Milliseconds since the Unix epoch. Used for deadlines that are
    /// meaningful across process restarts (disconnect deadlines, liveness
    /// timeouts).
    fn now_ms(&self) -> i64;

    /// A monotonic nanosecond counter with no defined epoch. Used only for
    /// UUID/timestamp sub-millisecond refinement and for bounding
    /// cooperative idle waits; never compared across processes.
    fn monotonic_nanos(&self) -> i64;
}

/// The real wall-clock + monotonic-counter implementation.
#[derive(Debug, Default)]
pub struct SystemClock {
    epoch: OnceInstant,
}

/// Lazily captures the `Instant` this clock was constructed at, so
/// `monotonic_nanos` stays a cheap subtraction rather than re-reading a
/// global each call.
#[derive(Debug)]
struct OnceInstant(Instant);

impl Default for OnceInstant {
    fn default() -> Self {
        Self(Instant::now())
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64
    }

    fn monotonic_nanos(&self) -> i64 {
        self.epoch.0.elapsed().as_nanos() as i64
    }
}
