//! The access gate: decides a single redemption attempt and applies exactly
//! the side effects that decision implies.
//!
//! Checks run in a fixed order and short-circuit: lookup, expiry,
//! exhaustion, password, OTP, then the atomic open. Expiry precedes
//! everything else so an expired drop never leaks content even to a caller
//! holding correct credentials. Every outcome, success or failure, writes an
//! access-log entry for abuse auditing.
//!
//! The caller IP is recorded for audit only; it never influences the
//! admission decision.

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::Utc;
use sha2::{Digest, Sha256};
use shared::api::ErrorBody;
use subtle::ConstantTimeEq;

use crate::{
    error::AppError,
    models::{Drop, LifecycleState},
    repos::{AccessLogRepo, DropRepo, outcomes},
    state::AppState,
    stores::{OtpStore, OtpVerification},
};

/// One redemption attempt.
#[derive(Debug, Clone, Default)]
pub struct RedeemRequest {
    pub token: String,
    pub password: Option<String>,
    pub otp: Option<String>,
    pub recipient: Option<String>,
    /// Audit only.
    pub ip: Option<String>,
}

/// Why a redemption was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    NotFound,
    Expired,
    Exhausted,
    PasswordRequired,
    InvalidPassword,
    OtpRequired,
    OtpInvalid { attempts_left: i64 },
    OtpExpired,
    OtpAttemptsExceeded,
}

impl Denial {
    /// Stable machine-readable code, also used as the access-log outcome.
    pub fn code(&self) -> &'static str {
        match self {
            Denial::NotFound => "not_found",
            Denial::Expired => "expired",
            Denial::Exhausted => "exhausted",
            Denial::PasswordRequired => "password_required",
            Denial::InvalidPassword => "invalid_password",
            Denial::OtpRequired => "otp_required",
            Denial::OtpInvalid { .. } => "otp_invalid",
            Denial::OtpExpired => "otp_expired",
            Denial::OtpAttemptsExceeded => "otp_attempts_exceeded",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Denial::NotFound => "Drop not found",
            Denial::Expired => "This drop has expired",
            Denial::Exhausted => "This drop has no opens remaining",
            Denial::PasswordRequired => "A password is required",
            Denial::InvalidPassword => "Invalid password",
            Denial::OtpRequired => "A one-time code and recipient are required",
            Denial::OtpInvalid { .. } => "Invalid code",
            Denial::OtpExpired => "The code has expired; request a new one",
            Denial::OtpAttemptsExceeded => "Too many wrong codes; request a new one",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Denial::NotFound => StatusCode::NOT_FOUND,
            Denial::Expired | Denial::Exhausted => StatusCode::GONE,
            Denial::OtpAttemptsExceeded => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<Denial> for AppError {
    fn from(denial: Denial) -> Self {
        let mut body = ErrorBody::new(denial.code(), denial.message());
        if let Denial::OtpInvalid { attempts_left } = &denial {
            body.attempts_left = Some(*attempts_left);
        }
        AppError::Denied(denial.status(), body)
    }
}

/// Result of a gate decision.
#[derive(Debug)]
pub enum GateOutcome {
    /// All gates passed; the returned row reflects the consumed open.
    Granted(Drop),
    Denied(Denial),
}

/// SHA-256 hex for stored passwords.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn password_matches(candidate: &str, stored_hex: &str) -> bool {
    let candidate_digest = Sha256::digest(candidate.as_bytes());
    hex::decode(stored_hex)
        .map(|stored| bool::from(candidate_digest.as_slice().ct_eq(&stored)))
        .unwrap_or(false)
}

/// Orchestrates one redemption attempt against the drop repository and the
/// OTP store. Besides the reclaimer's overdue sweep, this is the only writer
/// of terminal lifecycle transitions.
pub struct AccessGate {
    drops: Arc<dyn DropRepo>,
    otp: Arc<dyn OtpStore>,
    access_log: Arc<dyn AccessLogRepo>,
}

impl AccessGate {
    pub fn new(
        drops: Arc<dyn DropRepo>,
        otp: Arc<dyn OtpStore>,
        access_log: Arc<dyn AccessLogRepo>,
    ) -> Self {
        Self {
            drops,
            otp,
            access_log,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.repos.drops.clone(),
            state.stores.otp.clone(),
            state.repos.access_log.clone(),
        )
    }

    pub async fn redeem(&self, req: &RedeemRequest) -> Result<GateOutcome> {
        let Some(drop) = self.drops.find_by_token(&req.token).await? else {
            self.access_log
                .log(None, &req.token, Denial::NotFound.code(), req.ip.as_deref())
                .await;
            return Ok(GateOutcome::Denied(Denial::NotFound));
        };

        match self.check(&drop, req).await? {
            GateOutcome::Granted(updated) => {
                // One verified code covers one successful redemption; discard
                // it now that the content is being delivered.
                if drop.otp_recipient.is_some()
                    && let Some(recipient) = &req.recipient
                    && let Err(e) = self.otp.delete(&req.token, recipient).await
                {
                    tracing::warn!(token = %req.token, "failed to discard used OTP entry: {:?}", e);
                }

                self.access_log
                    .log(
                        Some(drop.id),
                        &req.token,
                        outcomes::SUCCESS,
                        req.ip.as_deref(),
                    )
                    .await;

                tracing::info!(
                    drop_id = %drop.id,
                    open_count = updated.open_count,
                    max_opens = updated.max_opens,
                    "drop redeemed"
                );

                Ok(GateOutcome::Granted(updated))
            }
            GateOutcome::Denied(denial) => {
                self.access_log
                    .log(Some(drop.id), &req.token, denial.code(), req.ip.as_deref())
                    .await;

                Ok(GateOutcome::Denied(denial))
            }
        }
    }

    /// The ordered checks, minus lookup and audit logging.
    async fn check(&self, drop: &Drop, req: &RedeemRequest) -> Result<GateOutcome> {
        let now = Utc::now();

        // Expiry first: correct credentials must never unlock expired content.
        if drop.lifecycle_state == LifecycleState::Expired || now >= drop.expires_at {
            if drop.lifecycle_state == LifecycleState::Active
                && let Err(e) = self.drops.mark_expired(drop.id).await
            {
                tracing::warn!(drop_id = %drop.id, "failed to mark drop expired: {:?}", e);
            }
            return Ok(GateOutcome::Denied(Denial::Expired));
        }

        if drop.lifecycle_state.is_terminal() || drop.open_count >= drop.max_opens {
            if drop.lifecycle_state == LifecycleState::Active
                && let Err(e) = self.drops.mark_consumed(drop.id).await
            {
                tracing::warn!(drop_id = %drop.id, "failed to mark drop consumed: {:?}", e);
            }
            return Ok(GateOutcome::Denied(Denial::Exhausted));
        }

        if let Some(stored) = &drop.password_hash {
            let Some(candidate) = &req.password else {
                return Ok(GateOutcome::Denied(Denial::PasswordRequired));
            };
            if !password_matches(candidate, stored) {
                return Ok(GateOutcome::Denied(Denial::InvalidPassword));
            }
        }

        if drop.otp_recipient.is_some() {
            let (Some(otp), Some(recipient)) = (&req.otp, &req.recipient) else {
                return Ok(GateOutcome::Denied(Denial::OtpRequired));
            };
            // Codes are only ever issued to the designated recipient, so a
            // lookup under any other address simply finds nothing.
            match self.otp.verify(&req.token, recipient, otp).await? {
                OtpVerification::Valid => {}
                OtpVerification::Invalid { attempts_left } => {
                    return Ok(GateOutcome::Denied(Denial::OtpInvalid { attempts_left }));
                }
                // Never-issued and expired are indistinguishable by design.
                OtpVerification::Expired | OtpVerification::NotFound => {
                    return Ok(GateOutcome::Denied(Denial::OtpExpired));
                }
                OtpVerification::AttemptsExceeded => {
                    return Ok(GateOutcome::Denied(Denial::OtpAttemptsExceeded));
                }
            }
        }

        // All gates passed. The conditional update is the only place an open
        // is consumed; losing the race here means another caller got the
        // last open (or expiry landed) between our checks and now.
        match self.drops.try_open(&req.token).await? {
            Some(updated) => Ok(GateOutcome::Granted(updated)),
            None if Utc::now() >= drop.expires_at => Ok(GateOutcome::Denied(Denial::Expired)),
            None => Ok(GateOutcome::Denied(Denial::Exhausted)),
        }
    }
}
