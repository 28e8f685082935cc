//! Quota ledger for PostgreSQL.
//!
//! Gates creation, not redemption. The counter is a lifetime total: it is
//! never reset by elapsed time, only by an explicit administrative reset.
//! Request-frequency throttling is a separate Redis counter (`stores::rate_limit`).

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::models::QuotaRecord;

/// Outcome of an admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; `used` includes the creation being admitted.
    Admitted { used: i64 },
    /// Origin is administratively blocked.
    Blocked,
    /// Lifetime limit reached. Counts are included for the client's
    /// upgrade prompt.
    LimitReached { used: i64, limit: i64 },
}

/// Repository for quota operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaRepo: Send + Sync {
    /// Admit or refuse one creation for `origin`. `limit = None` means the
    /// tier is unlimited; the attempt is still counted for analytics.
    ///
    /// The check and the increment are one statement, so two concurrent
    /// creations cannot both pass a limit with one slot left.
    async fn admit(&self, origin: &str, limit: Option<i64>) -> Result<Admission>;

    /// Fetch the record for an origin.
    async fn get(&self, origin: &str) -> Result<Option<QuotaRecord>>;

    /// Administrative reset of the lifetime counter. Returns false if the
    /// origin has no record.
    async fn reset(&self, origin: &str) -> Result<bool>;

    /// Administrative block/unblock. Creates the record if missing.
    async fn set_blocked(&self, origin: &str, blocked: bool) -> Result<()>;
}

/// PostgreSQL implementation of QuotaRepo.
#[derive(Clone)]
pub struct PgQuotaRepo {
    pool: Pool<Postgres>,
}

impl PgQuotaRepo {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaRepo for PgQuotaRepo {
    async fn admit(&self, origin: &str, limit: Option<i64>) -> Result<Admission> {
        let Some(limit) = limit else {
            // Unlimited tier: always admit, still count the attempt.
            let used: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO quota_records (origin_identity, total_created)
                VALUES ($1, 1)
                ON CONFLICT (origin_identity) DO UPDATE
                SET total_created = quota_records.total_created + 1,
                    last_seen_at = now()
                RETURNING total_created
                "#,
            )
            .bind(origin)
            .fetch_one(&self.pool)
            .await?;
            return Ok(Admission::Admitted { used });
        };

        if limit < 1 {
            return Ok(Admission::LimitReached { used: 0, limit });
        }

        // Conditional upsert: the WHERE clause makes check-and-increment
        // atomic. No row back means the condition failed; a follow-up read
        // only classifies the refusal.
        let used: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO quota_records (origin_identity, total_created)
            VALUES ($1, 1)
            ON CONFLICT (origin_identity) DO UPDATE
            SET total_created = quota_records.total_created + 1,
                last_seen_at = now()
            WHERE NOT quota_records.blocked
              AND quota_records.total_created < $2
            RETURNING total_created
            "#,
        )
        .bind(origin)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(used) = used {
            return Ok(Admission::Admitted { used });
        }

        match self.get(origin).await? {
            Some(record) if record.blocked => Ok(Admission::Blocked),
            Some(record) => Ok(Admission::LimitReached {
                used: record.total_created,
                limit,
            }),
            // Record vanished between statements (admin purge); be strict.
            None => Ok(Admission::LimitReached { used: 0, limit }),
        }
    }

    async fn get(&self, origin: &str) -> Result<Option<QuotaRecord>> {
        let record = sqlx::query_as::<_, QuotaRecord>(
            "SELECT * FROM quota_records WHERE origin_identity = $1",
        )
        .bind(origin)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn reset(&self, origin: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE quota_records SET total_created = 0 WHERE origin_identity = $1",
        )
        .bind(origin)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_blocked(&self, origin: &str, blocked: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quota_records (origin_identity, total_created, blocked)
            VALUES ($1, 0, $2)
            ON CONFLICT (origin_identity) DO UPDATE SET blocked = $2
            "#,
        )
        .bind(origin)
        .bind(blocked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
