//! HTTP client for the metadata service
//!
//! Every endpoint wraps its payload in a `{"response": ...}` envelope.
//! A 422 means the record already exists upstream, which callers treat
//! as success. Transient connection failures are retried a bounded
//! number of times with exponential backoff; the value from the
//! attempt that finally succeeds is returned to the caller.

use crate::{StorageError, StorageResult};
use frame_ingest_common::{FrameRecord, VideoRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Metadata service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Base URL of the metadata service
    pub base_url: String,

    /// Upper bound on attempts for transient failures
    pub max_retries: u32,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("ORCHESTRATION_ADDRESS")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            max_retries: 6,
        }
    }
}

impl MetadataConfig {
    pub fn validate(&self) -> StorageResult<()> {
        if self.base_url.is_empty() {
            return Err(StorageError::InvalidConfig(
                "metadata service base URL is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Game catalog record, used to name datasets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: String,
    pub title: String,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Interpret a metadata service response
///
/// 2xx unwraps the `"response"` field (and a nested `"data"` field
/// when present), 422 maps to [`StorageError::AlreadyExists`] and
/// everything else surfaces as a service error with its body intact.
fn parse_envelope(status: u16, body: &str) -> StorageResult<Value> {
    if status == 422 {
        return Err(StorageError::AlreadyExists(body.to_string()));
    }
    if !(200..300).contains(&status) {
        return Err(StorageError::Service {
            status,
            body: body.to_string(),
        });
    }

    let mut value: Value = serde_json::from_str(body)
        .map_err(|e| StorageError::Serialization(format!("invalid response body: {e}")))?;
    let mut response = match value.get_mut("response") {
        Some(inner) => inner.take(),
        None => {
            return Err(StorageError::Serialization(
                "response envelope is missing".to_string(),
            ))
        }
    };
    if let Some(data) = response.get_mut("data") {
        return Ok(data.take());
    }
    Ok(response)
}

enum Method {
    Get,
    Post,
    Put,
}

/// Client for the metadata service
pub struct MetadataClient {
    config: MetadataConfig,
    client: reqwest::Client,
}

impl MetadataClient {
    pub fn new(config: MetadataConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    /// One HTTP round trip, retried on transient failures only
    ///
    /// Attempt `n` sleeps `2^n` seconds before retrying. Service
    /// errors and duplicate responses are returned immediately.
    async fn request_with_retry(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        json: Option<&Value>,
    ) -> StorageResult<Value> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut attempt = 0u32;
        loop {
            let mut request = match method {
                Method::Get => self.client.get(&url),
                Method::Post => self.client.post(&url),
                Method::Put => self.client.put(&url),
            };
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = json {
                request = request.json(body);
            }

            let outcome = match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await?;
                    parse_envelope(status, &body)
                }
                Err(e) => Err(StorageError::from(e)),
            };

            match outcome {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = Duration::from_secs(1 << attempt);
                    warn!(
                        path,
                        attempt,
                        delay_secs = delay.as_secs(),
                        "transient metadata service failure, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Register a newly ingested video
    pub async fn register_video(&self, video: &VideoRecord) -> StorageResult<Value> {
        let body = serde_json::to_value(video)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.request_with_retry(
            Method::Post,
            "/ingress-videos/add-ingress-video",
            &[],
            Some(&body),
        )
        .await
    }

    /// Fetch a video record by its identifier
    pub async fn get_video_by_id(&self, video_id: &str) -> StorageResult<VideoRecord> {
        let value = self
            .request_with_retry(
                Method::Get,
                "/ingress-videos/get-ingress-video-by-video-id",
                &[("video_id", video_id)],
                None,
            )
            .await?;
        serde_json::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// List videos that have not been processed yet
    pub async fn list_unprocessed_videos(&self) -> StorageResult<Vec<VideoRecord>> {
        let value = self
            .request_with_retry(
                Method::Get,
                "/ingress-videos/list-unprocessed-list",
                &[],
                None,
            )
            .await?;
        serde_json::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Update a video record, typically to flip its processed flag
    pub async fn update_video(&self, video: &VideoRecord) -> StorageResult<Value> {
        let body = serde_json::to_value(video)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.request_with_retry(
            Method::Put,
            "/ingress-videos/update-ingress-video",
            &[],
            Some(&body),
        )
        .await
    }

    /// Register one accepted frame
    ///
    /// A duplicate response is surfaced as [`StorageError::AlreadyExists`]
    /// so the caller can count it as done.
    pub async fn register_frame(&self, frame: &FrameRecord) -> StorageResult<Value> {
        let body = serde_json::to_value(frame)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.request_with_retry(
            Method::Post,
            "/external-images/add-external-image",
            &[],
            Some(&body),
        )
        .await
    }

    /// Register a batch of accepted frames in one call
    pub async fn register_frame_list(&self, frames: &[FrameRecord]) -> StorageResult<Value> {
        let body = serde_json::to_value(frames)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.request_with_retry(
            Method::Post,
            "/external-images/add-external-image-list",
            &[],
            Some(&body),
        )
        .await
    }

    /// Look up the game a video belongs to
    pub async fn get_game(&self, game_id: &str) -> StorageResult<GameRecord> {
        let value = self
            .request_with_retry(
                Method::Get,
                "/video-games/get-video-game-by-game-id",
                &[("game_id", game_id)],
                None,
            )
            .await?;
        serde_json::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Create a dataset entry pointing at a storage bucket
    pub async fn add_dataset(&self, dataset_name: &str, bucket_id: &str) -> StorageResult<Value> {
        debug!(dataset_name, bucket_id, "registering dataset");
        self.request_with_retry(
            Method::Post,
            "/datasets/add-new-dataset",
            &[("dataset_name", dataset_name), ("bucket_id", bucket_id)],
            None,
        )
        .await
    }
}
