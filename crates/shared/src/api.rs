//! Shared API request/response types used by clients and the API server.

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

/// What kind of content a drop carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropKind {
    /// Binary payload stored in blob storage, transported as base64.
    File,
    /// Short text stored inline in metadata.
    Message,
}

/// 16MB base64 ≈ 12MB raw. Generous limit for shared files.
const MAX_CONTENT_LEN: usize = 16 * 1_048_576;
/// Max opens a sender may grant for a single drop.
const MAX_OPENS: u32 = 100;
/// Max TTL for drops (7 days).
const MAX_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Deposit a file or message and receive a redemption token.
#[derive(Debug, Serialize, Deserialize, Validate)]
#[garde(context(DateTime<Utc>))]
pub struct CreateDropPayload {
    #[garde(skip)]
    pub kind: DropKind,
    /// File bytes (base64) or message text, depending on `kind`.
    #[garde(length(min = 1, max = MAX_CONTENT_LEN))]
    pub content: String,
    /// Original file name, only meaningful for `kind = file`.
    #[garde(inner(length(min = 1, max = 255)))]
    pub file_name: Option<String>,
    /// When this drop expires and becomes unredeemable.
    #[garde(custom(validate_expires_at))]
    pub expires_at: DateTime<Utc>,
    /// How many successful redemptions are allowed (1 = burn after reading).
    #[garde(range(min = 1, max = MAX_OPENS))]
    pub max_opens: u32,
    /// Optional password gate.
    #[garde(inner(length(min = 1, max = 128)))]
    pub password: Option<String>,
    /// Optional OTP gate: codes are emailed to this recipient.
    #[garde(inner(email))]
    pub otp_recipient: Option<String>,
}

fn validate_expires_at(value: &DateTime<Utc>, now: &DateTime<Utc>) -> garde::Result {
    if value <= now {
        return Err(garde::Error::new("expires_at must be in the future"));
    }
    let max_expires = *now + chrono::Duration::seconds(MAX_TTL_SECS);
    if value > &max_expires {
        return Err(garde::Error::new(
            "expires_at cannot be more than 7 days from now",
        ));
    }
    Ok(())
}

/// Returned after depositing a drop.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDropResponse {
    /// Public, unguessable redemption token.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Credentials presented with a redemption attempt.
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct RedeemPayload {
    #[garde(inner(length(min = 1, max = 128)))]
    pub password: Option<String>,
    /// One-time code previously requested via the OTP endpoint.
    #[garde(inner(length(min = 6, max = 6), pattern(r"^[0-9]+$")))]
    pub otp: Option<String>,
    /// Recipient address the code was issued to.
    #[garde(inner(email))]
    pub recipient: Option<String>,
}

/// Content returned on a successful redemption.
#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemResponse {
    pub kind: DropKind,
    /// File bytes (base64) or message text, depending on `kind`.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Successful opens still available after this one.
    pub opens_remaining: u32,
}

/// Ask for a one-time code to be emailed to a recipient.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RequestOtpPayload {
    #[garde(email)]
    pub recipient: String,
}

/// Counters from one reclamation sweep.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SweepResponse {
    /// Overdue active drops flipped to expired before reclaiming.
    pub marked_expired: u64,
    pub reclaimed: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Structured error body for denied requests.
///
/// Carries enough for clients to render a precise message (attempts left,
/// quota usage) without exposing server internals.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `expired` or `quota_limit_reached`.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_left: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            attempts_left: None,
            used: None,
            limit: None,
        }
    }
}
