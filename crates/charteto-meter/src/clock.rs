//! Time sources for meters and the exporter.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Wall and monotonic time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch; used for point timestamps.
    fn wall_time_millis(&self) -> i64;

    /// Monotonic nanoseconds from an arbitrary origin; used for durations.
    fn monotonic_nanos(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall_time_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    fn monotonic_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct MockClock {
    wall_millis: AtomicI64,
    monotonic_nanos: AtomicU64,
}

impl MockClock {
    pub fn new(wall_millis: i64) -> Self {
        Self {
            wall_millis: AtomicI64::new(wall_millis),
            monotonic_nanos: AtomicU64::new(0),
        }
    }

    /// Move both wall and monotonic time forward.
    pub fn advance(&self, by: Duration) {
        self.wall_millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
        self.monotonic_nanos
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn wall_time_millis(&self) -> i64 {
        self.wall_millis.load(Ordering::SeqCst)
    }

    fn monotonic_nanos(&self) -> u64 {
        self.monotonic_nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances_both_sources() {
        let clock = MockClock::new(1_000);
        clock.advance(Duration::from_millis(1_500));
        assert_eq!(clock.wall_time_millis(), 2_500);
        assert_eq!(clock.monotonic_nanos(), 1_500_000_000);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic_nanos();
        let b = clock.monotonic_nanos();
        assert!(b >= a);
        assert!(clock.wall_time_millis() > 0);
    }
}
