//! Database repositories (PostgreSQL).
//!
//! This module contains traits and implementations for database access.
//! Each repository is abstracted behind a trait to enable mocking in tests.
//!
//! ## Repositories
//!
//! - **drops** - canonical drop metadata and lifecycle transitions
//! - **quota** - per-origin lifetime creation counters
//! - **access_log** - audit rows for redemption attempts
//! - **accounts** - API key to tier lookup
//!
//! ## Usage in Handlers
//!
//! Repositories are accessed via `state.repos`:
//!
//! ```ignore
//! async fn handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
//!     let drop = state.repos.drops.find_by_token(&token).await?;
//!     let admission = state.repos.quota.admit(&origin, Some(50)).await?;
//! }
//! ```

mod access_log;
mod accounts;
mod drops;
mod quota;

pub use access_log::{AccessLogRepo, PgAccessLogRepo, outcomes};
pub use accounts::{AccountRepo, PgAccountRepo};
pub use drops::{DropRepo, PgDropRepo};
pub use quota::{Admission, PgQuotaRepo, QuotaRepo};

#[cfg(test)]
pub use access_log::MockAccessLogRepo;
#[cfg(test)]
pub use accounts::MockAccountRepo;
#[cfg(test)]
pub use drops::MockDropRepo;
#[cfg(test)]
pub use quota::MockQuotaRepo;

use std::sync::Arc;

/// Collection of all database repositories.
#[derive(Clone)]
pub struct Repos {
    pub drops: Arc<dyn DropRepo>,
    pub quota: Arc<dyn QuotaRepo>,
    pub access_log: Arc<dyn AccessLogRepo>,
    pub accounts: Arc<dyn AccountRepo>,
}
