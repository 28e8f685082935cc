use std::sync::Arc;

use crate::{
    config::Config,
    repos::Repos,
    services::{BlobStore, EmailSender},
    stores::Stores,
};

#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Database repositories.
    pub repos: Repos,
    /// Ephemeral stores (Redis).
    pub stores: Stores,
    /// Blob storage (S3).
    pub blob: Arc<dyn BlobStore>,
    /// Email sender.
    pub email: Arc<dyn EmailSender>,
}
