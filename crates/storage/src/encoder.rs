//! Embedding encoder client
//!
//! The encoder is an external HTTP service: one RGB image in, one
//! fixed-dimension feature vector out. Inputs arrive either as encoded
//! file bytes or as an already decoded frame buffer; the variant is
//! explicit so raw pixel data is never mistaken for a compressed file.

use crate::{StorageError, StorageResult};
use image::RgbImage;
use serde::Deserialize;
use std::io::Cursor;

/// One image handed to the encoder
pub enum EncoderInput {
    /// Encoded file contents (JPEG, PNG, ...)
    RawBytes(Vec<u8>),

    /// A frame that was already decoded in-process
    DecodedBuffer(RgbImage),
}

impl EncoderInput {
    /// Decode to an RGB buffer regardless of variant
    pub fn into_rgb(self) -> StorageResult<RgbImage> {
        match self {
            EncoderInput::RawBytes(bytes) => {
                let image = image::load_from_memory(&bytes)
                    .map_err(|e| StorageError::Encoder(format!("undecodable image bytes: {e}")))?;
                Ok(image.to_rgb8())
            }
            EncoderInput::DecodedBuffer(image) => Ok(image),
        }
    }
}

/// Encoder service configuration
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub base_url: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("ENCODER_ADDRESS")
                .unwrap_or_else(|_| "http://localhost:8100".to_string()),
        }
    }
}

/// Produces a feature vector for one image
#[async_trait::async_trait]
pub trait ImageEncoder: Send + Sync {
    async fn encode(&self, input: EncoderInput) -> StorageResult<Vec<f32>>;
}

#[derive(Deserialize)]
struct EncoderResponse {
    response: Vec<f32>,
}

/// HTTP-backed encoder
pub struct HttpImageEncoder {
    config: EncoderConfig,
    client: reqwest::Client,
}

impl HttpImageEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl ImageEncoder for HttpImageEncoder {
    async fn encode(&self, input: EncoderInput) -> StorageResult<Vec<f32>> {
        let image = input.into_rgb()?;

        // PNG keeps the upload lossless; the encoder re-decodes anyway
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| StorageError::Encoder(format!("failed to encode PNG: {e}")))?;

        let response = self
            .client
            .post(format!("{}/encode-image", self.config.base_url))
            .header("content-type", "image/png")
            .body(png)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Service {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: EncoderResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Encoder(format!("invalid encoder response: {e}")))?;
        if parsed.response.is_empty() {
            return Err(StorageError::Encoder(
                "encoder returned an empty vector".to_string(),
            ));
        }
        Ok(parsed.response)
    }
}
