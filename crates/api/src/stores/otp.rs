//! One-time code storage.
//!
//! Codes are issued for a (token, recipient) pair, live for a short TTL, and
//! allow a fixed number of verification attempts. Codes are hashed (SHA-256)
//! before storage so a Redis compromise doesn't leak valid codes.
//!
//! Two implementations share one decision function:
//! - `RedisOtpStore` - production; entries expire via native Redis TTL and
//!   the attempt counter is an atomic HINCRBY.
//! - `MemoryOtpStore` - single-instance deployments and tests; an in-process
//!   map behind a mutex.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;

/// Verification attempts allowed per issued code.
pub const OTP_ATTEMPT_CAP: i64 = 3;
/// Digits in a code.
pub const OTP_CODE_LEN: usize = 6;

/// Outcome of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpVerification {
    Valid,
    /// Wrong code; the caller may retry with `attempts_left` more attempts.
    Invalid { attempts_left: i64 },
    /// Entry outlived its TTL. Deleted on observation.
    Expired,
    /// Attempt cap reached. Deleted on observation.
    AttemptsExceeded,
    /// Never issued, already expired, or already exhausted - indistinguishable
    /// to the caller by design.
    NotFound,
}

/// Store for one-time codes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Health check - verify connectivity.
    async fn health_check(&self) -> Result<bool>;

    /// Issue a fresh code for the pair, replacing (and invalidating) any
    /// existing entry. Returns the plaintext code for the delivery path;
    /// it must never be logged.
    async fn issue(&self, token: &str, recipient: &str, ttl_secs: u64) -> Result<String>;

    /// Verify a candidate code. Every attempt is counted, match or not.
    async fn verify(&self, token: &str, recipient: &str, candidate: &str)
    -> Result<OtpVerification>;

    /// Discard the entry, e.g. after the gated content was delivered.
    async fn delete(&self, token: &str, recipient: &str) -> Result<()>;
}

/// Entry snapshot used by the shared decision logic. `attempts_used` already
/// counts the attempt being judged.
#[derive(Debug, Clone)]
struct OtpEntry {
    code_hash: String,
    expires_at: i64,
    attempts_used: i64,
}

/// Generate a random numeric code.
fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..OTP_CODE_LEN)
        .map(|_| rng.random_range(0..10).to_string())
        .collect()
}

/// SHA-256 hex of a code.
fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

fn otp_key(token: &str, recipient: &str) -> String {
    format!("otp:{}:{}", token, recipient.to_lowercase())
}

/// Decide the outcome of one attempt against an entry snapshot whose counter
/// already includes this attempt. Pure; side effects (deletes, marking
/// verified) are applied by the stores.
fn evaluate(entry: &OtpEntry, candidate: &str, now: i64) -> OtpVerification {
    if now > entry.expires_at {
        return OtpVerification::Expired;
    }
    // Counter past the cap means the cap was hit on an earlier attempt.
    if entry.attempts_used > OTP_ATTEMPT_CAP {
        return OtpVerification::AttemptsExceeded;
    }

    let candidate_digest = Sha256::digest(candidate.as_bytes());
    let matches = hex::decode(&entry.code_hash)
        .map(|stored| bool::from(candidate_digest.as_slice().ct_eq(&stored)))
        .unwrap_or(false);

    if matches {
        OtpVerification::Valid
    } else if entry.attempts_used >= OTP_ATTEMPT_CAP {
        OtpVerification::AttemptsExceeded
    } else {
        OtpVerification::Invalid {
            attempts_left: OTP_ATTEMPT_CAP - entry.attempts_used,
        }
    }
}

/// Redis implementation of OtpStore.
#[derive(Clone)]
pub struct RedisOtpStore {
    client: redis::Client,
}

impl RedisOtpStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OtpStore for RedisOtpStore {
    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(result == "PONG")
    }

    async fn issue(&self, token: &str, recipient: &str, ttl_secs: u64) -> Result<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = otp_key(token, recipient);

        let code = generate_code();
        let now = Utc::now().timestamp();

        // DEL first so a re-issue invalidates the old code and its counter.
        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .hset(&key, "code_hash", hash_code(&code))
            .hset(&key, "issued_at", now)
            .hset(&key, "expires_at", now + ttl_secs as i64)
            .hset(&key, "attempts", 0i64)
            .expire(&key, ttl_secs as i64)
            .query_async(&mut conn)
            .await?;

        Ok(code)
    }

    async fn verify(
        &self,
        token: &str,
        recipient: &str,
        candidate: &str,
    ) -> Result<OtpVerification> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = otp_key(token, recipient);

        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(OtpVerification::NotFound);
        }

        let attempts_after: i64 = conn.hincr(&key, "attempts", 1).await?;

        let entry = OtpEntry {
            code_hash: fields.get("code_hash").cloned().unwrap_or_default(),
            expires_at: fields
                .get("expires_at")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            attempts_used: attempts_after,
        };

        let now = Utc::now().timestamp();
        let verdict = evaluate(&entry, candidate, now);

        match &verdict {
            OtpVerification::Valid => {
                let _: () = conn.hset(&key, "verified_at", now).await?;
            }
            OtpVerification::Expired | OtpVerification::AttemptsExceeded => {
                let _: () = conn.del(&key).await?;
            }
            _ => {}
        }

        Ok(verdict)
    }

    async fn delete(&self, token: &str, recipient: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(otp_key(token, recipient)).await?;
        Ok(())
    }
}

/// In-process implementation of OtpStore for single-instance deployments.
/// Expired entries are dropped on observation rather than by a timer.
#[derive(Default)]
pub struct MemoryOtpStore {
    entries: Mutex<HashMap<String, OtpEntry>>,
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn issue(&self, token: &str, recipient: &str, ttl_secs: u64) -> Result<String> {
        let code = generate_code();
        let now = Utc::now().timestamp();

        let entry = OtpEntry {
            code_hash: hash_code(&code),
            expires_at: now + ttl_secs as i64,
            attempts_used: 0,
        };

        self.entries
            .lock()
            .await
            .insert(otp_key(token, recipient), entry);

        Ok(code)
    }

    async fn verify(
        &self,
        token: &str,
        recipient: &str,
        candidate: &str,
    ) -> Result<OtpVerification> {
        let key = otp_key(token, recipient);
        let mut entries = self.entries.lock().await;

        let Some(entry) = entries.get_mut(&key) else {
            return Ok(OtpVerification::NotFound);
        };

        entry.attempts_used += 1;
        let now = Utc::now().timestamp();
        let verdict = evaluate(entry, candidate, now);

        if matches!(
            verdict,
            OtpVerification::Expired | OtpVerification::AttemptsExceeded
        ) {
            entries.remove(&key);
        }

        Ok(verdict)
    }

    async fn delete(&self, token: &str, recipient: &str) -> Result<()> {
        self.entries.lock().await.remove(&otp_key(token, recipient));
        Ok(())
    }
}
