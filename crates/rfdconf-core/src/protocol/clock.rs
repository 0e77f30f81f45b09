//! Time source for protocol waits
//!
//! Every guard period, poll and timeout in the session goes through a
//! [`Clock`], so the same state machine runs against real hardware with
//! [`SystemClock`] and against the simulated modem with [`ManualClock`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source with blocking waits
pub trait Clock {
    /// Current instant
    fn now(&self) -> Instant;

    /// Block until `deadline` has passed. Returns immediately if it already has.
    fn sleep_until(&self, deadline: Instant);

    /// Block for `duration`
    fn sleep(&self, duration: Duration) {
        self.sleep_until(self.now() + duration);
    }
}

/// Wall-clock time backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Virtual clock that only moves when something sleeps on it.
///
/// Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Virtual clock starting at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Time elapsed on this clock since it was created
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move the clock forward without anyone sleeping
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep_until(&self, deadline: Instant) {
        let target = deadline.saturating_duration_since(self.origin);
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        if target > *offset {
            *offset = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_only_moves_forward() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_millis(250));
        assert_eq!(clock.now() - start, Duration::from_millis(250));

        // Sleeping until a past instant is a no-op
        clock.sleep_until(start);
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        other.advance(Duration::from_secs(2));
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_system_clock_sleep_until_past_returns() {
        let clock = SystemClock;
        let past = clock.now();
        clock.sleep_until(past);
        assert!(clock.now() >= past);
    }
}
