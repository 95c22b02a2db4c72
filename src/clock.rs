//! Time source used by the fail-window bookkeeping.
//!
//! The selection core only ever needs "seconds since some fixed epoch" and
//! never needs wall-clock semantics (leap seconds, timezones, ...), so this
//! is a plain monotonic counter rather than [`std::time::SystemTime`]. Tests
//! drive a [`FixedClock`] instead of sleeping in real time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A source of "now", expressed in whole seconds since an arbitrary epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// The default clock, backed by [`Instant`] so it is immune to wall-clock
/// adjustments (NTP step, DST, ...) during a process's lifetime.
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

/// A clock for tests: starts at zero and only moves when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicU64,
}

impl FixedClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_on_demand() {
        let clock = FixedClock::new(10);
        assert_eq!(clock.now(), 10);
        clock.advance(5);
        assert_eq!(clock.now(), 15);
    }
}
