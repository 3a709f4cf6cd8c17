use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::lock;

/// Trailing-window counter per key: at most `limit` admissions in any
/// window-long interval. Rejected calls are not recorded.
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, self.limit, Instant::now())
    }

    /// Same window, caller-chosen limit (the AI limiter depends on premium).
    pub fn check_with_limit(&self, key: &str, limit: usize) -> bool {
        self.check_at(key, limit, Instant::now())
    }

    pub fn check_at(&self, key: &str, limit: usize, now: Instant) -> bool {
        let mut buckets = lock(&self.buckets);
        let bucket = buckets.entry(key.to_string()).or_default();

        while bucket
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            bucket.pop_front();
        }

        if bucket.len() >= limit {
            return false;
        }

        bucket.push_back(now);
        true
    }

    /// Drop buckets with no admission inside the window. Returns how many.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut buckets = lock(&self.buckets);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            bucket
                .back()
                .is_some_and(|newest| now.duration_since(*newest) < self.window)
        });
        before - buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_three_per_minute() {
        let limiter = SlidingWindowLimiter::per_minute(3);
        let t0 = Instant::now();

        for i in 0..3 {
            assert!(limiter.check_at("ip", 3, t0 + Duration::from_millis(i)));
        }
        assert!(!limiter.check_at("ip", 3, t0 + Duration::from_secs(1)));
        assert!(limiter.check_at("ip", 3, t0 + Duration::from_secs(61)));
    }

    #[test]
    fn rejections_are_not_recorded() {
        let limiter = SlidingWindowLimiter::per_minute(1);
        let t0 = Instant::now();
        assert!(limiter.check_at("k", 1, t0));
        for s in 1..30 {
            assert!(!limiter.check_at("k", 1, t0 + Duration::from_secs(s)));
        }
        // only the first admission ages out; the rejections never counted
        assert!(limiter.check_at("k", 1, t0 + Duration::from_secs(60)));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::per_minute(1);
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn sweep_drops_idle_buckets() {
        let limiter = SlidingWindowLimiter::per_minute(5);
        let t0 = Instant::now();
        limiter.check_at("old", 5, t0);
        limiter.check_at("fresh", 5, t0 + Duration::from_secs(50));

        assert_eq!(limiter.sweep(t0 + Duration::from_secs(70)), 1);
        assert_eq!(limiter.sweep(t0 + Duration::from_secs(70)), 0);
    }
}
