//! Time abstraction so that presence and history timestamps stay
//! deterministic under test. Production code obtains wall-clock time only
//! through a [`TimeProvider`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of millisecond unix timestamps.
pub trait TimeProvider: Send + Sync {
    /// Current unix time in milliseconds.
    fn unix_millis(&self) -> u64;
}

/// Production time provider backed by the system clock.
#[derive(Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn unix_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Deterministic time provider for tests. Starts at a fixed value and only
/// moves when advanced explicitly.
#[derive(Debug)]
pub struct FixedTimeProvider {
    millis: AtomicU64,
}

impl FixedTimeProvider {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Advance the clock by the given number of milliseconds.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute value.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl TimeProvider for FixedTimeProvider {
    fn unix_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_time_provider() {
        let time = FixedTimeProvider::new(42);
        assert_eq!(time.unix_millis(), 42);
        time.advance(8);
        assert_eq!(time.unix_millis(), 50);
        time.set(1000);
        assert_eq!(time.unix_millis(), 1000);
    }

    #[test]
    fn test_system_time_provider_is_nonzero() {
        let time = SystemTimeProvider;
        assert!(time.unix_millis() > 0);
    }
}
