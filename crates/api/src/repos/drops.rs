//! Drop metadata repository for PostgreSQL.
//!
//! Owns every lifecycle transition. The one correctness-critical statement is
//! `try_open`: a single conditional UPDATE that consumes an open, so two
//! concurrent redemptions of a `max_opens = 1` drop cannot both succeed.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

// Aliased because an unqualified `Drop` in scope shadows `std::ops::Drop`,
// which breaks the destructor impl generated by `mockall::automock`.
use crate::models::{Drop as DropRow, NewDrop};

/// Repository for drop operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DropRepo: Send + Sync {
    /// Health check - verify database connectivity.
    async fn health_check(&self) -> Result<bool>;

    /// Insert a new drop in the Active state.
    async fn insert(&self, drop: NewDrop) -> Result<DropRow>;

    /// Find a drop by its redemption token.
    async fn find_by_token(&self, token: &str) -> Result<Option<DropRow>>;

    /// Atomically consume one open: increments `open_count` and flips the
    /// state to Consumed when the increment exhausts the drop. Returns the
    /// updated row, or None if the drop was not Active with an open to spare
    /// (the caller lost the race, or the drop expired meanwhile).
    async fn try_open(&self, token: &str) -> Result<Option<DropRow>>;

    /// Active -> Expired. Returns false if the drop already left Active.
    async fn mark_expired(&self, id: Uuid) -> Result<bool>;

    /// Active -> Consumed. Returns false if the drop already left Active.
    async fn mark_consumed(&self, id: Uuid) -> Result<bool>;

    /// Flip every overdue Active drop to Expired. Returns the row count.
    async fn expire_overdue(&self) -> Result<u64>;

    /// Page of Expired/Consumed drops awaiting reclamation, ordered by id,
    /// starting after the cursor.
    async fn list_reclaimable(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<DropRow>>;

    /// Terminal -> Reclaimed, nulling `blob_ref`. Returns false if the row
    /// was already Reclaimed (idempotent re-run) or not terminal.
    async fn mark_reclaimed(&self, id: Uuid) -> Result<bool>;

    /// Hard-delete Reclaimed rows that expired before the cutoff.
    async fn purge_reclaimed(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// PostgreSQL implementation of DropRepo.
#[derive(Clone)]
pub struct PgDropRepo {
    pool: Pool<Postgres>,
}

impl PgDropRepo {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DropRepo for PgDropRepo {
    async fn health_check(&self) -> Result<bool> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    async fn insert(&self, drop: NewDrop) -> Result<DropRow> {
        let row = sqlx::query_as::<_, DropRow>(
            r#"
            INSERT INTO drops
                (token, kind, blob_ref, payload_inline, file_name, expires_at,
                 max_opens, password_hash, otp_recipient, origin_identity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&drop.token)
        .bind(drop.kind)
        .bind(&drop.blob_ref)
        .bind(&drop.payload_inline)
        .bind(&drop.file_name)
        .bind(drop.expires_at)
        .bind(drop.max_opens)
        .bind(&drop.password_hash)
        .bind(&drop.otp_recipient)
        .bind(&drop.origin_identity)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<DropRow>> {
        let row = sqlx::query_as::<_, DropRow>("SELECT * FROM drops WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn try_open(&self, token: &str) -> Result<Option<DropRow>> {
        let row = sqlx::query_as::<_, DropRow>(
            r#"
            UPDATE drops
            SET open_count = open_count + 1,
                lifecycle_state = CASE
                    WHEN open_count + 1 >= max_opens THEN 'consumed'::drop_state
                    ELSE lifecycle_state
                END
            WHERE token = $1
              AND lifecycle_state = 'active'::drop_state
              AND open_count < max_opens
              AND expires_at > now()
            RETURNING *
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_expired(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE drops SET lifecycle_state = 'expired'::drop_state
            WHERE id = $1 AND lifecycle_state = 'active'::drop_state
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_consumed(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE drops SET lifecycle_state = 'consumed'::drop_state
            WHERE id = $1 AND lifecycle_state = 'active'::drop_state
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn expire_overdue(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE drops SET lifecycle_state = 'expired'::drop_state
            WHERE lifecycle_state = 'active'::drop_state AND expires_at <= now()
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_reclaimable(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<DropRow>> {
        let rows = sqlx::query_as::<_, DropRow>(
            r#"
            SELECT * FROM drops
            WHERE lifecycle_state IN ('expired'::drop_state, 'consumed'::drop_state)
              AND ($1::uuid IS NULL OR id > $1)
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_reclaimed(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE drops SET lifecycle_state = 'reclaimed'::drop_state, blob_ref = NULL
            WHERE id = $1
              AND lifecycle_state IN ('expired'::drop_state, 'consumed'::drop_state)
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_reclaimed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM drops
            WHERE lifecycle_state = 'reclaimed'::drop_state AND expires_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
