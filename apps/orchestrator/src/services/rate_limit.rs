// [apps/orchestrator/src/services/rate_limit.rs]
//! C10: in-process sliding-window rate limiter. One mutex-guarded map of
//! `key -> deque of monotonic timestamps`; each `allow()` call is a short
//! critical section (amortized O(1)), matching the teacher's swarm
//! telemetry map pattern in `services/reaper.rs` (a `RwLock`-guarded map
//! pruned on a timer) but keyed and pruned on read instead of on a tick.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const WINDOW_SECONDS: i64 = 60;

#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { windows: Mutex::new(HashMap::new()) }
    }

    /// Prunes entries older than 60s, rejects if at or over `limit`,
    /// otherwise appends `now` and allows.
    pub fn allow(&self, key: &str, limit: u32, now: DateTime<Utc>) -> bool {
        let cutoff = now - ChronoDuration::seconds(WINDOW_SECONDS);
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        let deque = windows.entry(key.to_string()).or_default();
        while let Some(front) = deque.front() {
            if *front <= cutoff {
                deque.pop_front();
            } else {
                break;
            }
        }
        if deque.len() as u32 >= limit {
            return false;
        }
        deque.push_back(now);
        true
    }
}

/// First 12 hex chars of SHA-256 of the bearer token, used as the global
/// rate-limit key component when no principal has been resolved yet.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new();
        let now = Utc::now();
        for _ in 0..5 {
            assert!(limiter.allow("k", 5, now));
        }
        assert!(!limiter.allow("k", 5, now));
    }

    #[test]
    fn window_slides_forward() {
        let limiter = RateLimiter::new();
        let t0 = Utc::now();
        for _ in 0..3 {
            assert!(limiter.allow("k", 3, t0));
        }
        assert!(!limiter.allow("k", 3, t0));
        let later = t0 + ChronoDuration::seconds(61);
        assert!(limiter.allow("k", 3, later));
    }

    #[test]
    fn fingerprint_is_stable_and_12_hex_chars() {
        let a = token_fingerprint("abc");
        let b = token_fingerprint("abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
