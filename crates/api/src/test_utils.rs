//! Shared test utilities for API handler tests.
//!
//! Provides common mock factories and a flexible `TestStateBuilder` for constructing
//! `AppState` instances with only the mocks needed for each test.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::test_utils::{TestStateBuilder, mock_drop};
//!
//! let mut drop_repo = MockDropRepo::new();
//! drop_repo.expect_find_by_token().returning(|_| Ok(Some(mock_drop("tok"))));
//!
//! let state = TestStateBuilder::new()
//!     .with_drop_repo(drop_repo)
//!     .build();
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Account, Drop, DropKind, LifecycleState, Tier};
use crate::repos::{
    MockAccessLogRepo, MockAccountRepo, MockDropRepo, MockQuotaRepo, Repos,
};
use crate::services::{MockBlobStore, MockEmailSender};
use crate::state::AppState;
use crate::stores::{MockOtpStore, MockRateLimiter, Stores};

/// Creates a test configuration with dummy values.
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 3000,
        database_url: "postgres://test".to_string(),
        redis_url: "redis://test".to_string(),
        blob_bucket: "test-bucket".to_string(),
        smtp_url: None,
        resend_api_key: None,
        env: "test".to_string(),
        sentry_dsn: None,
        admin_token: None,
        free_tier_drop_limit: 50,
        otp_ttl_secs: 600,
        otp_backend: "redis".to_string(),
        otp_request_limit: 5,
        otp_request_window_secs: 3600,
        sweep_interval_secs: 3600,
        sweep_page_size: 500,
        blob_delete_timeout_secs: 5,
        retention_days: 30,
        purge_every_sweeps: 24,
    }
}

/// Creates an active single-open message drop with the given token.
pub fn mock_drop(token: &str) -> Drop {
    Drop {
        id: Uuid::new_v4(),
        token: token.to_string(),
        kind: DropKind::Message,
        blob_ref: None,
        payload_inline: Some("test message".to_string()),
        file_name: None,
        created_at: Utc::now(),
        expires_at: Utc::now() + Duration::hours(1),
        max_opens: 1,
        open_count: 0,
        password_hash: None,
        otp_recipient: None,
        origin_identity: "ip:1.2.3.4".to_string(),
        lifecycle_state: LifecycleState::Active,
    }
}

/// Creates an account at the given tier.
pub fn mock_account(tier: Tier) -> Account {
    Account {
        id: Uuid::new_v4(),
        email: "sender@example.com".to_string(),
        api_key: "sk_live_abc".to_string(),
        tier,
        created_at: Utc::now(),
    }
}

/// Builder for constructing test `AppState` with custom mocks.
///
/// Uses default (empty) mocks for any repo/store/service not explicitly set.
/// This allows tests to only configure the mocks they actually need.
pub struct TestStateBuilder {
    drop_repo: Option<MockDropRepo>,
    quota_repo: Option<MockQuotaRepo>,
    access_log_repo: Option<MockAccessLogRepo>,
    account_repo: Option<MockAccountRepo>,
    otp_store: Option<MockOtpStore>,
    rate_limiter: Option<MockRateLimiter>,
    blob_store: Option<MockBlobStore>,
    email_sender: Option<MockEmailSender>,
}

impl TestStateBuilder {
    /// Creates a new builder with no mocks configured.
    pub fn new() -> Self {
        Self {
            drop_repo: None,
            quota_repo: None,
            access_log_repo: None,
            account_repo: None,
            otp_store: None,
            rate_limiter: None,
            blob_store: None,
            email_sender: None,
        }
    }

    pub fn with_drop_repo(mut self, repo: MockDropRepo) -> Self {
        self.drop_repo = Some(repo);
        self
    }

    pub fn with_quota_repo(mut self, repo: MockQuotaRepo) -> Self {
        self.quota_repo = Some(repo);
        self
    }

    pub fn with_access_log_repo(mut self, repo: MockAccessLogRepo) -> Self {
        self.access_log_repo = Some(repo);
        self
    }

    pub fn with_account_repo(mut self, repo: MockAccountRepo) -> Self {
        self.account_repo = Some(repo);
        self
    }

    pub fn with_otp_store(mut self, store: MockOtpStore) -> Self {
        self.otp_store = Some(store);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: MockRateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_blob_store(mut self, store: MockBlobStore) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn with_email_sender(mut self, sender: MockEmailSender) -> Self {
        self.email_sender = Some(sender);
        self
    }

    /// Builds the `AppState` using configured mocks or defaults.
    pub fn build(self) -> AppState {
        let repos = Repos {
            drops: Arc::new(self.drop_repo.unwrap_or_else(MockDropRepo::new)),
            quota: Arc::new(self.quota_repo.unwrap_or_else(MockQuotaRepo::new)),
            access_log: Arc::new(self.access_log_repo.unwrap_or_else(default_access_log_repo)),
            accounts: Arc::new(self.account_repo.unwrap_or_else(MockAccountRepo::new)),
        };

        let stores = Stores {
            otp: Arc::new(self.otp_store.unwrap_or_else(MockOtpStore::new)),
            rate_limiter: Arc::new(self.rate_limiter.unwrap_or_else(MockRateLimiter::new)),
        };

        let blob = Arc::new(self.blob_store.unwrap_or_else(MockBlobStore::new))
            as Arc<dyn crate::services::BlobStore>;
        let email = Arc::new(self.email_sender.unwrap_or_else(MockEmailSender::new))
            as Arc<dyn crate::services::EmailSender>;

        AppState {
            config: test_config(),
            repos,
            stores,
            blob,
            email,
        }
    }
}

impl Default for TestStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a default access-log mock that accepts any entry, since nearly
/// every gate path writes one.
fn default_access_log_repo() -> MockAccessLogRepo {
    let mut repo = MockAccessLogRepo::new();
    repo.expect_log().returning(|_, _, _, _| ());
    repo
}
