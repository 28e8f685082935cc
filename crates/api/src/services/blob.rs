//! Blob storage abstraction backed by S3.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use uuid::Uuid;

/// Store for blob operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes, returning an opaque reference.
    async fn put(&self, bytes: Vec<u8>) -> Result<String>;

    /// Fetch bytes by reference.
    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>>;

    /// Delete by reference. Deleting an absent blob is not an error.
    async fn delete(&self, blob_ref: &str) -> Result<()>;
}

/// S3 implementation of BlobStore.
#[derive(Clone)]
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    /// Build a client from the ambient AWS environment (credentials chain,
    /// region).
    pub async fn new(bucket: String) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket,
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        let key = Uuid::new_v4().simple().to_string();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("put blob {}", key))?;

        Ok(key)
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(blob_ref)
            .send()
            .await
            .with_context(|| format!("get blob {}", blob_ref))?;

        let bytes = object
            .body
            .collect()
            .await
            .with_context(|| format!("read blob body {}", blob_ref))?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn delete(&self, blob_ref: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(blob_ref)
            .send()
            .await
            .with_context(|| format!("delete blob {}", blob_ref))?;

        Ok(())
    }
}
