use std::{
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff for throttling-class failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 1_000,
            multiplier: 2.0,
            max_backoff_ms: 16_000,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_retry(&self, attempt: u32) -> bool { attempt < self.max_attempts.max(1) }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let ms = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exp);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }

    /// The whole backoff schedule, one entry per retry.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts.max(1)).map(|attempt| self.backoff(attempt)).collect()
    }
}

/// Spaces successive requests to one service at least `interval` apart,
/// across all threads sharing the limiter.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval, next_slot: Mutex::new(None) }
    }

    #[inline] pub fn interval(&self) -> Duration { self.interval }

    /// Block until the caller's reserved slot arrives.
    pub fn wait(&self) {
        let slot = {
            let mut next = self.next_slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.interval);
            slot
        };
        let now = Instant::now();
        if slot > now {
            thread::sleep(slot - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::{Duration, Instant}};

    use super::{RateLimiter, RetryPolicy};

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy { max_attempts: 6, initial_backoff_ms: 500, multiplier: 2.0, max_backoff_ms: 3_000 };
        let ms: Vec<u64> = policy.schedule().iter().map(|d| d.as_millis() as u64).collect();
        assert_eq!(ms, vec![500, 1_000, 2_000, 3_000, 3_000]);
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy { max_attempts: 3, ..RetryPolicy::default() };
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));

        let single = RetryPolicy { max_attempts: 0, ..RetryPolicy::default() };
        assert!(!single.allows_retry(1));
        assert!(single.schedule().is_empty());
    }

    #[test]
    fn limiter_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(25));
        let start = Instant::now();
        for _ in 0..3 { limiter.wait(); }
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn limiter_is_shared_across_threads() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(20)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4).map(|_| {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || limiter.wait())
        }).collect();
        for h in handles { h.join().unwrap(); }
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
