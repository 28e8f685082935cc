//! Access log repository for PostgreSQL.
//!
//! Provides fire-and-forget logging of redemption attempts for abuse
//! auditing. Errors during logging are recorded but never block the gate.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::models::AccessLogEntry;

/// Outcome strings written to the log.
pub mod outcomes {
    pub const SUCCESS: &str = "success";
    pub const OTP_REQUESTED: &str = "otp_requested";
}

/// Repository for access-log operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessLogRepo: Send + Sync {
    /// Log a redemption attempt (fire-and-forget, errors are logged but not
    /// propagated).
    async fn log<'a>(&self, drop_id: Option<Uuid>, token: &str, outcome: &str, ip: Option<&'a str>);

    /// Recent entries for a token, newest first.
    async fn list_for_token(&self, token: &str, limit: i64) -> Result<Vec<AccessLogEntry>>;

    /// Delete entries older than the cutoff. Returns the row count.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// PostgreSQL implementation of AccessLogRepo.
#[derive(Clone)]
pub struct PgAccessLogRepo {
    pool: Pool<Postgres>,
}

impl PgAccessLogRepo {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessLogRepo for PgAccessLogRepo {
    async fn log<'a>(&self, drop_id: Option<Uuid>, token: &str, outcome: &str, ip: Option<&'a str>) {
        let result = sqlx::query(
            "INSERT INTO access_log (drop_id, token, outcome, ip) VALUES ($1, $2, $3, $4)",
        )
        .bind(drop_id)
        .bind(token)
        .bind(outcome)
        .bind(ip)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                drop_id = ?drop_id,
                outcome = %outcome,
                error = %e,
                "Failed to write access log entry"
            );
        }
    }

    async fn list_for_token(&self, token: &str, limit: i64) -> Result<Vec<AccessLogEntry>> {
        let rows = sqlx::query_as::<_, AccessLogEntry>(
            r#"
            SELECT * FROM access_log
            WHERE token = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM access_log WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
