// [apps/orchestrator/src/clock.rs]
//! C1: monotonic UTC "now" and normalization helpers. Kept as a thin trait
//! seam (not a bare `Utc::now()` call scattered through services) so tests
//! can freeze time without a real sleep.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Normalizes an optional incoming timestamp to a UTC instant, defaulting
/// to `now` when absent. Storage is always UTC; no timezone-naive instants
/// survive past this boundary.
pub fn normalize_or_now(incoming: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    incoming.unwrap_or(now)
}

/// `last_seen_at` is monotonic: the merged value never regresses.
pub fn monotonic_max(existing: DateTime<Utc>, incoming: DateTime<Utc>) -> DateTime<Utc> {
    if incoming > existing {
        incoming
    } else {
        existing
    }
}

pub fn inactive_days(now: DateTime<Utc>, last_seen_at: DateTime<Utc>) -> i64 {
    (now - last_seen_at).num_days().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn monotonic_max_never_regresses() {
        let base = Utc::now();
        let earlier = base - Duration::hours(1);
        assert_eq!(monotonic_max(base, earlier), base);
        let later = base + Duration::hours(1);
        assert_eq!(monotonic_max(base, later), later);
    }

    #[test]
    fn inactive_days_floors_and_never_negative() {
        let now = Utc::now();
        assert_eq!(inactive_days(now, now), 0);
        assert_eq!(inactive_days(now, now + Duration::hours(1)), 0);
        assert_eq!(inactive_days(now, now - Duration::days(95) - Duration::hours(3)), 95);
    }
}
