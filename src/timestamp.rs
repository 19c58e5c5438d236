use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref CLOCK_ORIGIN: Instant = Instant::now();
}

/// Monotonic milliseconds since the clock origin.
///
/// The origin is fixed by [`Timestamp::mark_origin`], which `Platform::new`
/// calls during startup. Without a platform it is fixed by the first
/// timestamp read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd, Default)]
#[serde(transparent)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Fixes the clock origin. Later calls leave it unchanged.
    pub fn mark_origin() {
        lazy_static::initialize(&CLOCK_ORIGIN);
    }

    pub fn now() -> Self {
        Self::from(CLOCK_ORIGIN.elapsed())
    }

    pub fn as_millis(&self) -> f64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, saturating at zero.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_secs_f64(((self.0 - earlier.0) / 1000.0).max(0.0))
    }
}

impl From<Duration> for Timestamp {
    fn from(elapsed: Duration) -> Self {
        Self(elapsed.as_nanos() as f64 / 1_000_000.0)
    }
}

impl From<Timestamp> for f64 {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_timestamp_is_monotonic() {
        let first = Timestamp::now();
        std::thread::sleep(Duration::from_millis(2));
        let second = Timestamp::now();
        assert!(second > first);
        assert!(second.since(first) >= Duration::from_millis(1));
    }

    #[test]
    fn test_mark_origin_is_stable() {
        Timestamp::mark_origin();
        let before = Timestamp::now();
        Timestamp::mark_origin();
        assert!(Timestamp::now() >= before);
    }

    #[test]
    fn test_timestamp_since_saturates() {
        let later = Timestamp::from(Duration::from_millis(10));
        let earlier = Timestamp::from(Duration::from_millis(5));
        assert_eq!(earlier.since(later), Duration::ZERO);
    }

    #[test]
    fn test_timestamp_from_duration() {
        let timestamp = Timestamp::from(Duration::from_micros(1500));
        assert!((timestamp.as_millis() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_display() {
        let timestamp = Timestamp::from(Duration::from_millis(42));
        assert_eq!(timestamp.to_string(), "42.000ms");
    }

    #[test]
    fn test_timestamp_serialize() {
        let timestamp = Timestamp::from(Duration::from_millis(7));
        let serialized = serde_json::to_string(&timestamp).unwrap();
        assert_eq!(serialized, "7.0");
        let deserialized: Timestamp = serde_json::from_str(&serialized).unwrap();
        assert_eq!(timestamp, deserialized);
    }
}
