//! Account lookup for PostgreSQL.
//!
//! The narrow identity interface: an API key resolves to an account and its
//! tier. Callers without one are attributed by IP at the free tier.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Account;

/// Repository for account operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepo: Send + Sync {
    /// Resolve an API key to its account.
    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Account>>;
}

/// PostgreSQL implementation of AccountRepo.
#[derive(Clone)]
pub struct PgAccountRepo {
    pool: sqlx::Pool<sqlx::Postgres>,
}

impl PgAccountRepo {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepo for PgAccountRepo {
    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }
}
