//! Ephemeral stores (Redis).
//!
//! This module contains traits and implementations for ephemeral data
//! storage. All data stored here has automatic TTL-based expiration.
//!
//! ## Stores
//!
//! - **otp** - one-time codes keyed by (token, recipient), short TTL
//! - **rate_limit** - OTP request frequency counters
//!
//! ## Redis Key Patterns
//!
//! ```text
//! otp:{token}:{recipient}                → OTP entry hash (auto-expires)
//! ratelimit:otp:{token}:{recipient}      → issue-request counter
//! ```

mod otp;
mod rate_limit;

pub use otp::{MemoryOtpStore, OtpStore, OtpVerification, RedisOtpStore};
pub use rate_limit::{RateLimitResult, RateLimiter, RedisRateLimiter};

#[cfg(test)]
pub use otp::MockOtpStore;
#[cfg(test)]
pub use rate_limit::MockRateLimiter;

use std::sync::Arc;

/// Collection of all ephemeral stores.
#[derive(Clone)]
pub struct Stores {
    pub otp: Arc<dyn OtpStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}
