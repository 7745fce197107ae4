//! In-memory dual-bucket rate limiter — TPS bucket + per-minute token
//! bucket, keyed by (virtual_key_id, model_alias).
//!
//! Buckets are created lazily on first use and never evicted; the
//! registry lock is held only long enough to fetch-or-insert the bucket,
//! never while consulting it. Thread-safe via `Mutex<HashMap>`.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Instant;

/// Composite key for a limiter pair: (virtual_key_id, model_alias).
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct LimiterKey {
    virtual_key_id: String,
    model_alias: String,
}

/// A single token bucket: refills continuously at `rate` units/second, up
/// to `capacity`. A limit of zero or less disables the bucket — every
/// check passes.
struct Bucket {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64, rate: f64) -> Self {
        Self {
            capacity,
            rate,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Try to take `n` tokens. Disabled buckets (`capacity <= 0`) always succeed.
    fn try_take(&mut self, n: f64) -> bool {
        if self.capacity <= 0.0 {
            return true;
        }
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }
}

/// Burst capacity for the TPS bucket: one request's worth of headroom above
/// the steady-state rate, matching the rate limiter this was ported from
/// (`rate.NewLimiter(rate.Limit(tps), int(tps)+1)`). Disabled when `tps_limit
/// <= 0`, so `try_take` keeps treating it as unlimited.
fn tps_capacity(tps_limit: f64) -> f64 {
    if tps_limit <= 0.0 {
        0.0
    } else {
        tps_limit.floor() + 1.0
    }
}

struct BucketPair {
    tps: Mutex<Bucket>,
    tokens: Mutex<Bucket>,
}

/// Registry of dual-bucket limiters, one pair per (virtual key, alias).
pub struct RateLimiter {
    buckets: RwLock<HashMap<LimiterKey, BucketPair>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Check whether a request with `estimated_tokens` may proceed under
    /// the (virtual_key_id, model_alias) limits. Non-blocking: on
    /// rejection the caller decides whether to retry or fail the request.
    ///
    /// Returns `(tps_ok, tokens_ok)`. Tokens are only debited from the
    /// token bucket when both checks pass, matching the "all or nothing"
    /// admission semantics a proxy needs.
    pub fn check(
        &self,
        virtual_key_id: &str,
        model_alias: &str,
        tps_limit: f64,
        token_limit: i64,
        estimated_tokens: i64,
    ) -> (bool, bool) {
        let key = LimiterKey {
            virtual_key_id: virtual_key_id.to_string(),
            model_alias: model_alias.to_string(),
        };

        // Fast path: bucket already exists.
        {
            let map = self.buckets.read().unwrap();
            if let Some(pair) = map.get(&key) {
                return Self::check_pair(pair, estimated_tokens);
            }
        }

        // Slow path: create under a write lock, then release before checking.
        {
            let mut map = self.buckets.write().unwrap();
            map.entry(key.clone()).or_insert_with(|| BucketPair {
                tps: Mutex::new(Bucket::new(tps_capacity(tps_limit), tps_limit)),
                tokens: Mutex::new(Bucket::new(token_limit as f64, token_limit as f64 / 60.0)),
            });
        }

        let map = self.buckets.read().unwrap();
        let pair = map.get(&key).expect("just inserted");
        Self::check_pair(pair, estimated_tokens)
    }

    fn check_pair(pair: &BucketPair, estimated_tokens: i64) -> (bool, bool) {
        let tps_ok = pair.tps.lock().unwrap().try_take(1.0);
        if !tps_ok {
            return (false, true);
        }
        let tokens_ok = pair
            .tokens
            .lock()
            .unwrap()
            .try_take(estimated_tokens as f64);
        (true, tokens_ok)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_within_tps_limit() {
        let limiter = RateLimiter::new();
        let (tps_ok, tokens_ok) = limiter.check("vk1", "fast", 2.0, 1000, 1);
        assert!(tps_ok);
        assert!(tokens_ok);
    }

    #[test]
    fn rejects_once_tps_capacity_exhausted() {
        let limiter = RateLimiter::new();
        // Capacity is floor(2.0) + 1 == 3.0, so the first three immediate
        // requests pass and only the fourth exceeds the burst.
        assert!(limiter.check("vk1", "fast", 2.0, 1_000_000, 1).0);
        assert!(limiter.check("vk1", "fast", 2.0, 1_000_000, 1).0);
        assert!(limiter.check("vk1", "fast", 2.0, 1_000_000, 1).0);
        let (tps_ok, _) = limiter.check("vk1", "fast", 2.0, 1_000_000, 1);
        assert!(!tps_ok, "fourth immediate request should exceed TPS capacity");
    }

    #[test]
    fn rejects_once_token_capacity_exhausted() {
        let limiter = RateLimiter::new();
        let (_, first) = limiter.check("vk1", "fast", 1_000.0, 100, 60);
        assert!(first);
        let (_, second) = limiter.check("vk1", "fast", 1_000.0, 100, 60);
        assert!(!second, "second request should exceed the remaining token budget");
    }

    #[test]
    fn disabled_bucket_always_allows() {
        let limiter = RateLimiter::new();
        for _ in 0..1000 {
            let (tps_ok, tokens_ok) = limiter.check("vk1", "fast", 0.0, 0, 1);
            assert!(tps_ok);
            assert!(tokens_ok);
        }
    }

    #[test]
    fn limits_are_independent_per_key_and_alias() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("vk1", "fast", 1.0, 10, 1).0);
        assert!(
            limiter.check("vk1", "fast", 1.0, 10, 1).0 == false
                || limiter.check("vk2", "fast", 1.0, 10, 1).0
        );
        assert!(limiter.check("vk1", "slow", 1.0, 10, 1).0, "different alias gets its own bucket");
    }
}
