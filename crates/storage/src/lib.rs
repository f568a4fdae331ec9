//! Storage and service clients for the frame ingest pipeline
//!
//! - **Object storage (S3/MinIO)**: source videos, accepted frames,
//!   embedding artifacts
//! - **Metadata service (HTTP/JSON)**: video and frame records,
//!   datasets, processed flags
//! - **Embedding encoder (HTTP)**: one RGB image in, one
//!   fixed-dimension vector out
//!
//! All network calls classify failures into the pipeline's taxonomy:
//! transient errors are retried at the call site, 422-class duplicate
//! responses are success-equivalent, everything else surfaces as that
//! item's failure.

use thiserror::Error;

pub mod embedding;
pub mod encoder;
pub mod metadata_client;
pub mod object_storage;

pub use embedding::{embedding_key_for, pack_embedding, unpack_embedding, EmbeddingArtifact};
pub use encoder::{EncoderConfig, EncoderInput, HttpImageEncoder, ImageEncoder};
pub use metadata_client::{GameRecord, MetadataClient, MetadataConfig};
pub use object_storage::{ObjectStorage, S3Config, S3ObjectStorage};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(String),

    #[error("Transient connection error: {0}")]
    Transient(String),

    /// 422-class response: the record already exists upstream
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Metadata service error ({status}): {body}")]
    Service { status: u16, body: String },

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for failures worth retrying with a delay
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }

    /// True for benign duplicate-record responses
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists(_))
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            StorageError::Transient(err.to_string())
        } else {
            StorageError::Service {
                status: err.status().map_or(0, |s| s.as_u16()),
                body: err.to_string(),
            }
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::Transient("connection refused".to_string()).is_transient());
        assert!(!StorageError::S3("boom".to_string()).is_transient());
        assert!(!StorageError::AlreadyExists("dup".to_string()).is_transient());
    }

    #[test]
    fn test_already_exists_classification() {
        assert!(StorageError::AlreadyExists("dup".to_string()).is_already_exists());
        assert!(!StorageError::NotFound("missing".to_string()).is_already_exists());
    }
}
