use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::config::Config;

/// What kind of content a drop carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "drop_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DropKind {
    File,
    Message,
}

impl From<shared::api::DropKind> for DropKind {
    fn from(kind: shared::api::DropKind) -> Self {
        match kind {
            shared::api::DropKind::File => DropKind::File,
            shared::api::DropKind::Message => DropKind::Message,
        }
    }
}

impl From<DropKind> for shared::api::DropKind {
    fn from(kind: DropKind) -> Self {
        match kind {
            DropKind::File => shared::api::DropKind::File,
            DropKind::Message => shared::api::DropKind::Message,
        }
    }
}

/// Lifecycle of a drop. Transitions are monotonic:
/// Active -> Consumed | Expired -> Reclaimed. A row never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "drop_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Active,
    Consumed,
    Expired,
    Reclaimed,
}

impl LifecycleState {
    /// No further successful redemption is possible from this state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, LifecycleState::Active)
    }
}

/// A deposited drop. Canonical record for the gate and the reclaimer;
/// nothing else mutates these rows.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Drop {
    pub id: Uuid,
    /// Public, unguessable redemption token.
    pub token: String,
    pub kind: DropKind,
    /// Blob storage handle. Non-null only while a File drop is unreclaimed.
    pub blob_ref: Option<String>,
    /// Inline text content for Message drops.
    pub payload_inline: Option<String>,
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_opens: i32,
    pub open_count: i32,
    /// SHA-256 hex of the password, present iff the password gate is enabled.
    pub password_hash: Option<String>,
    /// Address one-time codes are emailed to. Present iff the OTP gate is
    /// enabled.
    pub otp_recipient: Option<String>,
    /// IP or account that created the drop, attributed by the quota ledger.
    pub origin_identity: String,
    pub lifecycle_state: LifecycleState,
}

impl Drop {
    pub fn opens_remaining(&self) -> i32 {
        (self.max_opens - self.open_count).max(0)
    }
}

/// Fields needed to insert a drop. The database assigns id and created_at.
#[derive(Debug, Clone)]
pub struct NewDrop {
    pub token: String,
    pub kind: DropKind,
    pub blob_ref: Option<String>,
    pub payload_inline: Option<String>,
    pub file_name: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub max_opens: i32,
    pub password_hash: Option<String>,
    pub otp_recipient: Option<String>,
    pub origin_identity: String,
}

/// Per-origin lifetime creation counter. `total_created` only ever grows;
/// it is reset by an explicit administrative call, never by elapsed time.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub origin_identity: String,
    pub total_created: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub blocked: bool,
}

/// Subscription tier resolved from the account lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_tier", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Paid,
}

impl Tier {
    /// Lifetime drop-creation limit for this tier. None = unlimited.
    pub fn drop_limit(self, config: &Config) -> Option<i64> {
        match self {
            Tier::Free => Some(config.free_tier_drop_limit),
            Tier::Paid => None,
        }
    }
}

/// An account row. Callers without one are attributed by IP at the free tier.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub api_key: String,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
}

/// One audited redemption attempt, success or failure.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: Uuid,
    pub drop_id: Option<Uuid>,
    pub token: String,
    pub outcome: String,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_is_not_terminal() {
        assert!(!LifecycleState::Active.is_terminal());
    }

    #[test]
    fn consumed_expired_reclaimed_are_terminal() {
        assert!(LifecycleState::Consumed.is_terminal());
        assert!(LifecycleState::Expired.is_terminal());
        assert!(LifecycleState::Reclaimed.is_terminal());
    }

    #[test]
    fn opens_remaining_never_negative() {
        let drop = crate::test_utils::mock_drop("tok");
        let mut drop = drop;
        drop.max_opens = 1;
        drop.open_count = 2;

        assert_eq!(drop.opens_remaining(), 0);
    }
}
