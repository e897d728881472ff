//! Wire-stable duration type.
//!
//! [`DurationMs`] serializes as a plain integer of milliseconds rather than
//! serde's `{"secs": N, "nanos": N}` encoding of `std::time::Duration`, so
//! snapshots and transport envelopes keep a stable, portable format.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Duration in whole milliseconds with a stable JSON representation.
///
/// ```
/// use cortex_types::DurationMs;
///
/// let d = DurationMs::from_secs(2);
/// assert_eq!(serde_json::to_string(&d).unwrap(), "2000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DurationMs(u64);

impl DurationMs {
    /// Zero duration.
    pub const ZERO: Self = Self(0);

    /// Create from milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Create from seconds, saturating on overflow.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Create from whole days, saturating on overflow. Memory `max_age`
    /// defaults are expressed in days.
    pub const fn from_days(days: u64) -> Self {
        Self(days.saturating_mul(86_400_000))
    }

    /// The value in milliseconds.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Convert to `std::time::Duration`.
    pub const fn to_std(self) -> Duration {
        Duration::from_millis(self.0)
    }

    /// Saturating addition.
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl From<Duration> for DurationMs {
    fn from(d: Duration) -> Self {
        Self(d.as_millis().min(u64::MAX as u128) as u64)
    }
}

impl From<DurationMs> for Duration {
    fn from(d: DurationMs) -> Self {
        d.to_std()
    }
}

impl std::fmt::Display for DurationMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors() {
        assert_eq!(DurationMs::from_secs(3).as_millis(), 3000);
        assert_eq!(DurationMs::from_days(1).as_millis(), 86_400_000);
        assert_eq!(DurationMs::ZERO.as_millis(), 0);
    }

    #[test]
    fn std_roundtrip() {
        let d = DurationMs::from_millis(1500);
        let std: Duration = d.into();
        assert_eq!(DurationMs::from(std), d);
    }

    #[test]
    fn serializes_as_integer() {
        let d = DurationMs::from_millis(250);
        assert_eq!(serde_json::to_string(&d).unwrap(), "250");
        let back: DurationMs = serde_json::from_str("250").unwrap();
        assert_eq!(back, d);
    }
}
