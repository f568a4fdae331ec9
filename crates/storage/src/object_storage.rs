//! Object storage implementation using S3/MinIO
//!
//! Stores source videos, accepted frames and embedding artifacts.
//! Every write is existence-checked first and every download skips
//! files that are already local, so re-runs over the same video are
//! cheap no-ops.

use crate::{StorageError, StorageResult};
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// S3/MinIO configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// AWS region, or "us-east-1" for `MinIO`
    pub region: String,

    /// Custom endpoint for `MinIO`; empty means AWS S3
    pub endpoint: Option<String>,

    pub access_key_id: String,

    pub secret_access_key: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: std::env::var("MINIO_ADDRESS").ok(),
            access_key_id: std::env::var("MINIO_ACCESS_KEY").unwrap_or_default(),
            secret_access_key: std::env::var("MINIO_SECRET_KEY").unwrap_or_default(),
        }
    }
}

impl S3Config {
    /// Reject configurations that cannot reach storage at all
    pub fn validate(&self) -> StorageResult<()> {
        if self.access_key_id.is_empty() || self.secret_access_key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "missing object storage credentials".to_string(),
            ));
        }
        Ok(())
    }
}

/// Object storage operations used by the pipeline
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store an in-memory buffer at `bucket/key`
    async fn store_file(&self, bucket: &str, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Store a local file at `bucket/key`
    async fn store_file_from_path(&self, bucket: &str, key: &str, path: &Path)
        -> StorageResult<()>;

    /// Check whether `bucket/key` exists
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// Download `bucket/key` to a local path
    ///
    /// Returns `false` without touching the network when the local
    /// file is already present.
    async fn download_to_path(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<bool>;

    /// Upload a buffer only when the destination object is absent
    ///
    /// Returns `false` when the object already existed and the upload
    /// was skipped.
    async fn store_if_absent(&self, bucket: &str, key: &str, data: &[u8]) -> StorageResult<bool> {
        if self.exists(bucket, key).await? {
            debug!("object {bucket}/{key} already exists, skipping upload");
            return Ok(false);
        }
        self.store_file(bucket, key, data).await?;
        Ok(true)
    }

    /// Upload a local file only when the destination object is absent
    async fn store_path_if_absent(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> StorageResult<bool> {
        if self.exists(bucket, key).await? {
            debug!("object {bucket}/{key} already exists, skipping upload");
            return Ok(false);
        }
        self.store_file_from_path(bucket, key, path).await?;
        Ok(true)
    }
}

/// S3/MinIO object storage client
pub struct S3ObjectStorage {
    client: Client,
}

impl S3ObjectStorage {
    /// Build a client from configuration
    pub fn new(config: S3Config) -> StorageResult<Self> {
        config.validate()?;

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "frame-ingest-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .behavior_version(BehaviorVersion::latest());

        // Path-style addressing is required for MinIO
        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn store_file(&self, bucket: &str, key: &str, data: &[u8]) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }

    async fn store_file_from_path(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> StorageResult<()> {
        // Streamed from disk; the SDK splits large bodies itself
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") {
                    Ok(false)
                } else {
                    Err(StorageError::S3(e.to_string()))
                }
            }
        }
    }

    async fn download_to_path(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<bool> {
        if path.is_file() {
            info!("{} already exists, skipping download", path.display());
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::NotFound(format!("{bucket}/{key}"))
                } else {
                    StorageError::S3(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        tokio::fs::write(path, bytes.to_vec()).await?;
        Ok(true)
    }
}
