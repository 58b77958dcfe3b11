//
// rate_limit.rs
//
// Per-connection token buckets with fixed-window refill.
//

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Bucket capacity; also the number of requests allowed per window.
    pub max_tokens: u32,
    /// Window length. The bucket refills to full capacity once this has
    /// elapsed since the last refill, not continuously.
    pub refill_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            refill_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Token-bucket rate limiter keyed by connection id.
///
/// Buckets are created full on first use and dropped on disconnect, so a
/// reused connection id starts over with a fresh bucket. One connection's
/// exhaustion never affects another's bucket.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    /// Consume one token for `connection`; false when the bucket is empty.
    pub fn try_acquire(&self, connection: &str) -> bool {
        self.try_acquire_at(connection, Instant::now())
    }

    fn try_acquire_at(&self, connection: &str, now: Instant) -> bool {
        let mut bucket = self
            .buckets
            .entry(connection.to_string())
            .or_insert_with(|| Bucket {
                tokens: self.config.max_tokens,
                last_refill: now,
            });

        if now.duration_since(bucket.last_refill) >= self.config.refill_interval {
            bucket.tokens = self.config.max_tokens;
            bucket.last_refill = now;
        }

        if bucket.tokens == 0 {
            log::debug!("rate limit exceeded for connection '{connection}'");
            return false;
        }
        bucket.tokens -= 1;
        true
    }

    /// Drop the connection's bucket entirely (disconnect path).
    pub fn remove_connection(&self, connection: &str) {
        self.buckets.remove(connection);
    }

    pub fn tracked_connections(&self) -> usize {
        self.buckets.len()
    }
}
