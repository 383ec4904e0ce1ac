//! Wall-clock sources for scheduling.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of the current time for reminder scheduling.
///
/// Reminders are stored in UTC, but timers sleep on the tokio clock, so a
/// clock also maps a UTC instant to the tokio [`Instant`] at which it occurs.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;

    fn instant_at(&self, at: DateTime<Utc>) -> Instant;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        let wait = (at - Utc::now()).to_std().unwrap_or_default();
        Instant::now() + wait
    }
}

/// A clock that advances with the tokio clock from a fixed starting point.
///
/// Under a paused tokio runtime time only moves when every task is idle, so
/// firing schedules can be tested deterministically.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    wall: DateTime<Utc>,
    origin: Instant,
}

impl MonotonicClock {
    /// Starts at the current system time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            wall,
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().duration_since(self.origin);
        chrono::TimeDelta::from_std(elapsed)
            .ok()
            .and_then(|d| self.wall.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        let offset = (at - self.wall).to_std().unwrap_or_default();
        self.origin + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::new();
        let start = clock.now();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(clock.now() - start, chrono::TimeDelta::milliseconds(1500));
        let later = start + chrono::TimeDelta::seconds(10);
        assert_eq!(
            clock.instant_at(later) - Instant::now(),
            Duration::from_millis(8500)
        );
    }
}
