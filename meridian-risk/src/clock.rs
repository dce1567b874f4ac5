//! Monotonic time source abstraction - spec `9. DESIGN NOTES`: "expose the monotonic
//! clock as a collaborator so tests can simulate the 5-min BTC window, 30-min cooldown,
//! day/week boundary resets, and stability duration without sleeping."
//!
//! Grounded on the simulation-clock pattern used for deterministic backtests
//! elsewhere in the corpus (a settable, monotonic millisecond source), trimmed to the
//! millisecond-epoch resolution every other Meridian timestamp already uses.

use std::sync::atomic::{AtomicI64, Ordering};

/// A source of "now", abstracted so [`crate::engine::RiskEngine`] and
/// [`crate::blackswan::BlackSwanProtector`] ticks are testable without real sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    /// The current local-timezone calendar date, used for the day/week boundary
    /// reset in `R1` - spec `4.7`, open question on timezone configurability.
    fn today(&self) -> chrono::NaiveDate {
        chrono::DateTime::from_timestamp_millis(self.now_ms())
            .map(|dt| dt.naive_utc().date())
            .unwrap_or_default()
    }
}

/// Real wall-clock time, backed by [`std::time::SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Manually-advanced clock used by tests to simulate windows, cooldowns and
/// stability durations without sleeping real time.
#[derive(Debug)]
pub struct TestClock {
    now: AtomicI64,
}

impl TestClock {
    pub fn new(start_ms: i64) -> Self {
        Self { now: AtomicI64::new(start_ms) }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_deterministically() {
        let clock = TestClock::new(1_700_000_000_000);
        assert_eq!(clock.now_ms(), 1_700_000_000_000);
        clock.advance(60_000);
        assert_eq!(clock.now_ms(), 1_700_000_060_000);
        clock.set(0);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn system_clock_returns_plausible_epoch_millis() {
        let now = SystemClock.now_ms();
        assert!(now > 1_700_000_000_000);
    }
}
