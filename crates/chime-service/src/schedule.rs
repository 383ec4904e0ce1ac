//! Fire-time arithmetic.
//!
//! A periodic reminder ticks at `start_at + k * period` for `k = 0, 1, 2...`.
//! Next fire times are always taken from that grid rather than from the last
//! fire, so slow callbacks never push later ticks back. Ticks missed while a
//! callback was running (or while no member owned the reminder) are skipped,
//! not replayed.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Timing information handed to every reminder callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickStatus {
    /// When the reminder was first due.
    pub first_tick_time: DateTime<Utc>,
    /// Zero for a one-shot reminder.
    #[serde(serialize_with = "serialize_millis")]
    pub period: Duration,
    /// When this tick was delivered.
    pub current_tick_time: DateTime<Utc>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// The first tick at or after `not_before`.
///
/// A one-shot reminder whose start time has passed is due immediately.
pub fn next_tick(
    start_at: DateTime<Utc>,
    period: Duration,
    not_before: DateTime<Utc>,
) -> DateTime<Utc> {
    if not_before <= start_at {
        return start_at;
    }
    if period.is_zero() {
        return not_before;
    }

    let elapsed = (not_before - start_at).to_std().unwrap_or_default();
    let ticks = elapsed.as_nanos().div_ceil(period.as_nanos());
    offset(start_at, period.as_nanos().saturating_mul(ticks))
}

/// The tick that follows a tick fired at `fired`, given the time is now `now`.
pub fn next_tick_after(
    start_at: DateTime<Utc>,
    period: Duration,
    fired: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let candidate = next_tick(start_at, period, now.max(fired));
    if candidate <= fired {
        offset(candidate, period.as_nanos())
    } else {
        candidate
    }
}

fn offset(from: DateTime<Utc>, nanos: u128) -> DateTime<Utc> {
    i64::try_from(nanos)
        .ok()
        .and_then(|n| from.checked_add_signed(TimeDelta::nanoseconds(n)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
