//! Per-key token buckets with lazy refill.
//!
//! The limiter never sleeps: `consume` either succeeds or reports how long
//! the caller must wait (`retry_after_ms`) before the same consume can
//! succeed. Buckets live in a striped table so unrelated keys do not
//! contend on one lock.

use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

const STRIPES: usize = 16;

pub const DEFAULT_CAPACITY: u64 = 100;
pub const DEFAULT_REFILL_RATE: u64 = 10;
pub const DEFAULT_REFILL_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    pub capacity: u64,
    /// Tokens added per refill interval.
    pub refill_rate: u64,
    pub refill_interval_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            refill_rate: DEFAULT_REFILL_RATE,
            refill_interval_ms: DEFAULT_REFILL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u64,
    /// When the bucket next reaches full capacity, ms since epoch.
    pub reset_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
struct Bucket {
    config: BucketConfig,
    tokens: u64,
    last_refill_ms: i64,
}

impl Bucket {
    fn new(config: BucketConfig, now_ms: i64) -> Self {
        Self {
            config,
            tokens: config.capacity,
            last_refill_ms: now_ms,
        }
    }

    /// Advance `last_refill_ms` by whole intervals only, so fractional
    /// elapsed time is never lost.
    fn refill(&mut self, now_ms: i64) {
        let elapsed = now_ms.saturating_sub(self.last_refill_ms);
        if elapsed <= 0 {
            return;
        }
        let interval = self.config.refill_interval_ms.max(1) as i64;
        let intervals = elapsed / interval;
        if intervals == 0 {
            return;
        }
        let added = (intervals as u64).saturating_mul(self.config.refill_rate);
        self.tokens = self.tokens.saturating_add(added).min(self.config.capacity);
        self.last_refill_ms += intervals * interval;
    }

    fn retry_after_ms(&self, requested: u64) -> u64 {
        let missing = requested.saturating_sub(self.tokens);
        let rate = self.config.refill_rate.max(1);
        missing.div_ceil(rate) * self.config.refill_interval_ms
    }

    fn reset_at(&self, now_ms: i64) -> i64 {
        let missing = self.config.capacity.saturating_sub(self.tokens);
        let rate = self.config.refill_rate.max(1);
        let intervals = missing.div_ceil(rate);
        now_ms + (intervals * self.config.refill_interval_ms) as i64
    }
}

pub struct RateLimiter {
    stripes: Vec<Mutex<HashMap<String, Bucket>>>,
    default_config: BucketConfig,
    /// Clock indirection so tests can drive time.
    now_ms: fn() -> i64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(BucketConfig::default())
    }
}

impl RateLimiter {
    pub fn new(default_config: BucketConfig) -> Self {
        Self::with_clock(default_config, mcpr_core::now_ms)
    }

    pub fn with_clock(default_config: BucketConfig, now_ms: fn() -> i64) -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(HashMap::new())).collect(),
            default_config,
            now_ms,
        }
    }

    /// Set a per-key bucket configuration, resetting the bucket to full.
    pub fn configure(&self, key: &str, config: BucketConfig) {
        let now = (self.now_ms)();
        let mut stripe = self.stripe(key);
        stripe.insert(key.to_string(), Bucket::new(config, now));
    }

    /// Report the bucket state without consuming.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = (self.now_ms)();
        let mut stripe = self.stripe(key);
        let bucket = stripe
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(self.default_config, now));
        bucket.refill(now);

        RateDecision {
            allowed: bucket.tokens >= 1,
            remaining: bucket.tokens,
            reset_at: bucket.reset_at(now),
            retry_after_ms: (bucket.tokens == 0).then(|| bucket.retry_after_ms(1)),
        }
    }

    /// Atomically test-and-decrement `n` tokens. On denial the bucket is
    /// left untouched and `retry_after_ms` is set.
    pub fn consume(&self, key: &str, n: u64) -> RateDecision {
        let now = (self.now_ms)();
        let mut stripe = self.stripe(key);
        let bucket = stripe
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(self.default_config, now));
        bucket.refill(now);

        if bucket.tokens >= n {
            bucket.tokens -= n;
            RateDecision {
                allowed: true,
                remaining: bucket.tokens,
                reset_at: bucket.reset_at(now),
                retry_after_ms: None,
            }
        } else {
            RateDecision {
                allowed: false,
                remaining: bucket.tokens,
                reset_at: bucket.reset_at(now),
                retry_after_ms: Some(bucket.retry_after_ms(n)),
            }
        }
    }

    /// Restore a bucket to full capacity.
    pub fn reset(&self, key: &str) {
        let now = (self.now_ms)();
        let mut stripe = self.stripe(key);
        if let Some(bucket) = stripe.get_mut(key) {
            bucket.tokens = bucket.config.capacity;
            bucket.last_refill_ms = now;
        }
    }

    fn stripe(&self, key: &str) -> std::sync::MutexGuard<'_, HashMap<String, Bucket>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % STRIPES;
        self.stripes[index]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    static CLOCK: AtomicI64 = AtomicI64::new(0);

    fn test_clock() -> i64 {
        CLOCK.load(Ordering::SeqCst)
    }

    fn limiter(capacity: u64, rate: u64, interval: u64) -> RateLimiter {
        CLOCK.store(1_000_000, Ordering::SeqCst);
        RateLimiter::with_clock(
            BucketConfig {
                capacity,
                refill_rate: rate,
                refill_interval_ms: interval,
            },
            test_clock,
        )
    }

    fn advance(ms: i64) {
        CLOCK.fetch_add(ms, Ordering::SeqCst);
    }

    #[test]
    fn test_consume_until_empty() {
        let limiter = limiter(3, 1, 1_000);
        assert!(limiter.consume("k", 1).allowed);
        assert!(limiter.consume("k", 1).allowed);
        assert!(limiter.consume("k", 1).allowed);

        let denied = limiter.consume("k", 1);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after_ms, Some(1_000));
    }

    #[test]
    fn test_denied_consume_does_not_mutate() {
        let limiter = limiter(2, 1, 1_000);
        assert!(limiter.consume("k", 1).allowed);
        let denied = limiter.consume("k", 5);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 1);
        // The remaining token is still spendable.
        assert!(limiter.consume("k", 1).allowed);
    }

    #[test]
    fn test_lazy_refill_whole_intervals_only() {
        let limiter = limiter(10, 2, 1_000);
        for _ in 0..10 {
            assert!(limiter.consume("k", 1).allowed);
        }

        advance(999);
        assert!(!limiter.consume("k", 1).allowed);

        advance(1);
        let decision = limiter.consume("k", 1);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let limiter = limiter(5, 10, 1_000);
        assert!(limiter.consume("k", 1).allowed);
        advance(60_000);
        assert_eq!(limiter.check("k").remaining, 5);
    }

    #[test]
    fn test_retry_after_is_sufficient() {
        let limiter = limiter(4, 3, 500);
        for _ in 0..4 {
            assert!(limiter.consume("k", 1).allowed);
        }

        let denied = limiter.consume("k", 4);
        assert!(!denied.allowed);
        let retry = denied.retry_after_ms.unwrap();

        // Sleeping exactly retry_after must make the same consume succeed.
        advance(retry as i64);
        assert!(limiter.consume("k", 4).allowed);
    }

    #[test]
    fn test_reset_restores_capacity() {
        let limiter = limiter(3, 1, 1_000);
        limiter.consume("k", 3);
        assert!(!limiter.consume("k", 1).allowed);

        limiter.reset("k");
        assert_eq!(limiter.check("k").remaining, 3);
    }

    #[test]
    fn test_configure_overrides_default() {
        let limiter = limiter(100, 10, 1_000);
        limiter.configure(
            "small",
            BucketConfig {
                capacity: 1,
                refill_rate: 1,
                refill_interval_ms: 1_000,
            },
        );
        assert!(limiter.consume("small", 1).allowed);
        assert!(!limiter.consume("small", 1).allowed);
        // Other keys keep the default.
        assert_eq!(limiter.check("other").remaining, 100);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1, 1, 1_000);
        assert!(limiter.consume("a", 1).allowed);
        assert!(limiter.consume("b", 1).allowed);
        assert!(!limiter.consume("a", 1).allowed);
    }

    #[test]
    fn test_fractional_elapsed_time_is_preserved() {
        let limiter = limiter(10, 1, 1_000);
        limiter.consume("k", 10);

        // Two half-intervals in a row must still add up to one refill.
        advance(500);
        assert!(!limiter.consume("k", 1).allowed);
        advance(500);
        assert!(limiter.consume("k", 1).allowed);
    }
}
