//! Deterministic fakes for tests in dependent crates.
//!
//! Enabled with the `test-utils` feature so production builds never link
//! them.

use crate::clock::Clock;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A clock that only moves when told to.
///
/// `now()` returns a fixed epoch instant plus the accumulated offset, so
/// recency ordering and TTL expiry can be driven step by step.
pub struct ManualClock {
    epoch: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at its epoch.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut offset = self.offset.lock().unwrap();
        *offset += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.epoch + *self.offset.lock().unwrap()
    }

    fn now_millis(&self) -> u64 {
        self.offset.lock().unwrap().as_millis().min(u64::MAX as u128) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_only_on_demand() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now() - t0, Duration::from_secs(10));
        assert_eq!(clock.now_millis(), 10_000);
    }
}
