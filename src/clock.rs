//! Clock Implementations
//!
//! Expiry arithmetic always goes through the [`Clock`](crate::traits::Clock)
//! seam so tests can move time without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

use crate::traits::Clock;

/// Wall-clock UTC time; the production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Intended for expiry tests: instead of sleeping through a sliding window,
/// advance the clock past it.
///
/// # Example
///
/// ```rust
/// use durable_cache::clock::ManualClock;
/// use durable_cache::traits::Clock;
///
/// let clock = ManualClock::starting_at(1_700_000_000);
/// clock.advance_secs(90);
/// assert_eq!(clock.unix_seconds(), 1_700_000_090);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    seconds: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock pinned at the given Unix timestamp
    #[must_use]
    pub fn starting_at(unix_seconds: i64) -> Self {
        Self {
            seconds: AtomicI64::new(unix_seconds),
        }
    }

    /// Move the clock forward
    pub fn advance_secs(&self, secs: i64) {
        self.seconds.fetch_add(secs, Ordering::SeqCst);
    }

    /// Pin the clock to an absolute timestamp
    pub fn set(&self, unix_seconds: i64) {
        self.seconds.store(unix_seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.seconds.load(Ordering::SeqCst);
        match Utc.timestamp_opt(secs, 0) {
            chrono::LocalResult::Single(dt) => dt,
            // Out-of-range timestamps only arise from test misuse; clamp.
            _ => DateTime::<Utc>::MIN_UTC,
        }
    }

    fn unix_seconds(&self) -> i64 {
        self.seconds.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_at(100);
        assert_eq!(clock.unix_seconds(), 100);
        clock.advance_secs(50);
        assert_eq!(clock.unix_seconds(), 150);
        clock.set(42);
        assert_eq!(clock.unix_seconds(), 42);
    }

    #[test]
    fn system_clock_tracks_chrono() {
        let clock = SystemClock;
        let before = Utc::now().timestamp();
        let observed = clock.unix_seconds();
        let after = Utc::now().timestamp();
        assert!(observed >= before && observed <= after);
    }
}
