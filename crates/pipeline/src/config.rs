//! Pipeline configuration
//!
//! All knobs resolve from the environment with working defaults, so a
//! bare `frame-ingest process` against local MinIO and a local
//! metadata service needs no flags. Validation runs once at startup
//! and a bad configuration aborts the whole run, never individual
//! items.

use frame_ingest_storage::{EncoderConfig, MetadataConfig, S3Config, StorageResult};
use std::path::PathBuf;

/// Top-level configuration for one pipeline run
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub s3: S3Config,
    pub metadata: MetadataConfig,
    pub encoder: EncoderConfig,

    /// Bucket holding source videos
    pub video_bucket: String,

    /// Bucket holding accepted frames and embedding artifacts
    pub frame_bucket: String,

    /// Videos processed concurrently
    pub video_workers: usize,

    /// Frames persisted concurrently within one video
    pub frame_workers: usize,

    /// Root for per-video scratch directories
    pub work_dir: PathBuf,
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            s3: S3Config::default(),
            metadata: MetadataConfig::default(),
            encoder: EncoderConfig::default(),
            video_bucket: std::env::var("INGRESS_VIDEO_BUCKET")
                .unwrap_or_else(|_| "ingress-video".to_string()),
            frame_bucket: std::env::var("EXTERNAL_IMAGE_BUCKET")
                .unwrap_or_else(|_| "external".to_string()),
            video_workers: env_usize("VIDEO_WORKERS", 8),
            frame_workers: env_usize("FRAME_WORKERS", 32),
            work_dir: std::env::var("INGEST_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("frame-ingest")),
        }
    }
}

impl IngestConfig {
    /// Validate everything that would make the whole run pointless
    pub fn validate(&self) -> StorageResult<()> {
        self.s3.validate()?;
        self.metadata.validate()?;
        if self.video_workers == 0 || self.frame_workers == 0 {
            return Err(frame_ingest_storage::StorageError::InvalidConfig(
                "worker pool sizes must be at least 1".to_string(),
            ));
        }
        if self.video_bucket.is_empty() || self.frame_bucket.is_empty() {
            return Err(frame_ingest_storage::StorageError::InvalidConfig(
                "bucket names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> IngestConfig {
        IngestConfig {
            s3: S3Config {
                region: "us-east-1".to_string(),
                endpoint: Some("http://localhost:9000".to_string()),
                access_key_id: "minioadmin".to_string(),
                secret_access_key: "minioadmin".to_string(),
            },
            metadata: MetadataConfig {
                base_url: "http://localhost:8000".to_string(),
                max_retries: 6,
            },
            encoder: EncoderConfig {
                base_url: "http://localhost:8100".to_string(),
            },
            video_bucket: "ingress-video".to_string(),
            frame_bucket: "external".to_string(),
            video_workers: 8,
            frame_workers: 32,
            work_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = valid_config();
        config.video_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_bucket_rejected() {
        let mut config = valid_config();
        config.frame_bucket = String::new();
        assert!(config.validate().is_err());
    }
}
