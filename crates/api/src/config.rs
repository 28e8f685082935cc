use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    /// S3 bucket holding file drop blobs.
    pub blob_bucket: String,
    /// SMTP URL for development email (e.g., smtp://localhost:1025)
    #[serde(default)]
    pub smtp_url: Option<String>,
    /// Resend API key for production email
    #[serde(default)]
    pub resend_api_key: Option<String>,
    /// Set to "production" for JSON logging, anything else for human-readable.
    #[serde(default)]
    pub env: String,
    /// Sentry DSN for error tracking
    #[serde(default)]
    pub sentry_dsn: Option<String>,
    /// Bearer token guarding the /admin routes. Unset = admin routes disabled.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Lifetime drop-creation limit for free-tier origins.
    #[serde(default = "default_free_tier_drop_limit")]
    pub free_tier_drop_limit: i64,
    /// One-time code lifetime.
    #[serde(default = "default_otp_ttl_secs")]
    pub otp_ttl_secs: u64,
    /// "redis" (default) or "memory" for single-instance deployments.
    #[serde(default = "default_otp_backend")]
    pub otp_backend: String,
    /// Max OTP issue requests per (token, recipient) per window.
    #[serde(default = "default_otp_request_limit")]
    pub otp_request_limit: i64,
    #[serde(default = "default_otp_request_window_secs")]
    pub otp_request_window_secs: u64,
    /// Reclamation sweep cadence.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Rows fetched per sweep page.
    #[serde(default = "default_sweep_page_size")]
    pub sweep_page_size: i64,
    /// Per-blob delete timeout during a sweep; timeouts count as failures.
    #[serde(default = "default_blob_delete_timeout_secs")]
    pub blob_delete_timeout_secs: u64,
    /// How long reclaimed rows and access-log rows are kept before the purge.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// The audit purge runs once every N sweeps.
    #[serde(default = "default_purge_every_sweeps")]
    pub purge_every_sweeps: u32,
}

fn default_free_tier_drop_limit() -> i64 {
    50
}

fn default_otp_ttl_secs() -> u64 {
    10 * 60
}

fn default_otp_backend() -> String {
    "redis".to_string()
}

fn default_otp_request_limit() -> i64 {
    5
}

fn default_otp_request_window_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_sweep_page_size() -> i64 {
    500
}

fn default_blob_delete_timeout_secs() -> u64 {
    30
}

fn default_retention_days() -> i64 {
    30
}

fn default_purge_every_sweeps() -> u32 {
    24
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}
