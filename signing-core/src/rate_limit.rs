//! Sliding-window rate limiter (§4.5).
//!
//! Generalizes the teacher's IP-keyed, fixed-tier limiter into a
//! `String`-keyed limiter taking `(limit, window_ms)` per call, still built
//! on the same `Mutex<HashMap<Key, Bucket>>` + periodic-GC shape.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Per-key request tracker.
struct Bucket {
    timestamps: Vec<Instant>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            timestamps: Vec::new(),
        }
    }

    fn check_and_record(&mut self, window: Duration, limit: u32) -> bool {
        let now = Instant::now();
        let cutoff = now.checked_sub(window).unwrap_or(now);
        self.timestamps.retain(|t| *t > cutoff);

        if (self.timestamps.len() as u32) < limit {
            self.timestamps.push(now);
            true
        } else {
            false
        }
    }
}

/// GC interval: clean up stale keys every 5 minutes.
const GC_INTERVAL_SECS: u64 = 300;

pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    last_gc: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            last_gc: Mutex::new(Instant::now()),
        }
    }

    /// `allow(key, limit, window_ms)` — returns true iff the number of
    /// entries younger than `window_ms` before appending is strictly less
    /// than `limit`, and in that case appends `now`.
    pub fn allow(&self, key: &str, limit: u32, window_ms: u64) -> bool {
        let window = Duration::from_millis(window_ms);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        {
            let mut last_gc = self.last_gc.lock().unwrap_or_else(|e| e.into_inner());
            if last_gc.elapsed().as_secs() >= GC_INTERVAL_SECS {
                let cutoff = Instant::now().checked_sub(window * 2).unwrap_or_else(Instant::now);
                buckets.retain(|_, b| b.timestamps.last().is_some_and(|t| *t > cutoff));
                *last_gc = Instant::now();
            }
        }

        let bucket = buckets.entry(key.to_string()).or_insert_with(Bucket::new);
        bucket.check_and_record(window, limit)
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Force-drop buckets with no entry in the last hour, independent of
    /// the lazy per-`allow()` sweep (§5.1 periodic backstop).
    pub fn gc(&self) {
        let cutoff = Instant::now()
            .checked_sub(Duration::from_secs(3600))
            .unwrap_or_else(Instant::now);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.retain(|_, b| b.timestamps.last().is_some_and(|t| *t > cutoff));
        *self.last_gc.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

static LIMITER: Lazy<RateLimiter> = Lazy::new(RateLimiter::new);

/// Access the process-wide limiter.
pub fn limiter() -> &'static RateLimiter {
    &LIMITER
}

pub fn key_user_identity_create(user_id: &str) -> String {
    format!("user:{user_id}:identity_create")
}

pub fn key_user_sign_intent(user_id: &str) -> String {
    format!("user:{user_id}:sign_intent")
}

pub fn key_identity_sign(identity_id: &str) -> String {
    format!("identity:{identity_id}:sign")
}

pub fn key_identity_destroy(identity_id: &str) -> String {
    format!("identity:{identity_id}:destroy")
}

/// Background purge of stale rate-limiter buckets (§5.1).
pub fn gc_all() {
    limiter().gc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_within_limit() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("k", 3, 60_000));
        assert!(limiter.allow("k", 3, 60_000));
        assert!(limiter.allow("k", 3, 60_000));
        assert!(!limiter.allow("k", 3, 60_000));
    }

    #[test]
    fn separate_keys_independent() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("a", 1, 60_000));
        assert!(!limiter.allow("a", 1, 60_000));
        assert!(limiter.allow("b", 1, 60_000));
    }

    #[test]
    fn window_elapses_and_allows_again() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("k", 1, 50));
        assert!(!limiter.allow("k", 1, 50));
        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.allow("k", 1, 50));
    }
}
