//! Request-frequency limiting for Redis.
//!
//! Time-bucketed counters (INCR + EXPIRE), used to throttle OTP issue
//! requests. Deliberately separate from the quota ledger, which is a
//! lifetime counter and never decays.

use anyhow::Result;
use async_trait::async_trait;

/// Rate limiter trait for checking and incrementing counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request against `key` with a TTL-based window.
    async fn check(&self, key: &str, limit: i64, ttl_secs: u64) -> Result<RateLimitResult>;
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Under the limit, includes current count.
    Allowed(i64),
    /// Over the limit, includes current count.
    Exceeded(i64),
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed(_))
    }
}

/// Redis implementation of RateLimiter.
#[derive(Clone)]
pub struct RedisRateLimiter {
    client: redis::Client,
}

impl RedisRateLimiter {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, key: &str, limit: i64, ttl_secs: u64) -> Result<RateLimitResult> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;

        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await?;
        }

        if count > limit {
            Ok(RateLimitResult::Exceeded(count))
        } else {
            Ok(RateLimitResult::Allowed(count))
        }
    }
}
