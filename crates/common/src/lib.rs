/// Common types for the gameplay frame ingest pipeline
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub mod hash;

pub use hash::{ContentHasher, HashKind};

/// Extraction and pipeline errors
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to probe video: {0}")]
    Probe(String),

    #[error("Failed to decode video: {0}")]
    Decode(String),

    #[error("No key frames found in video")]
    NoKeyFrames,

    #[error("Image processing error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<image::ImageError> for IngestError {
    fn from(err: image::ImageError) -> Self {
        IngestError::Image(err.to_string())
    }
}

/// Result type for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Pixel dimensions of a frame or video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A registered source video as stored by the metadata service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Content hash of the video file
    pub file_hash: String,

    /// Stable video identifier
    pub video_id: String,

    /// Bucket-qualified storage path, e.g. `ingress-video/S_123/abc.mp4`
    pub file_path: String,

    /// Original source URL
    #[serde(default)]
    pub video_url: String,

    #[serde(default)]
    pub video_title: String,

    #[serde(default)]
    pub video_description: String,

    /// Human-readable resolution label, e.g. "720p"
    #[serde(default)]
    pub video_resolution: String,

    /// Container extension without the dot, e.g. "mp4"
    pub video_extension: String,

    /// Duration in seconds
    #[serde(default)]
    pub video_length: i64,

    /// File size in bytes; negative when unknown
    #[serde(default = "default_filesize")]
    pub video_filesize: i64,

    #[serde(default)]
    pub video_frame_rate: i64,

    #[serde(default)]
    pub video_language: String,

    /// Set to true by the pipeline once every frame is durably stored
    #[serde(default)]
    pub processed: bool,

    /// Owning game identifier
    #[serde(default)]
    pub game_id: i64,

    #[serde(default)]
    pub upload_date: String,
}

fn default_filesize() -> i64 {
    -1
}

impl VideoRecord {
    /// Local scratch filename for the downloaded video
    #[must_use]
    pub fn local_filename(&self) -> String {
        format!("{}.{}", self.video_id, self.video_extension)
    }
}

/// A key frame that survived deduplication, hashed and saved to scratch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedFrame {
    /// Decode-order frame number within the source video
    pub frame_number: u64,

    /// Hex digest of the saved frame file, used as its storage address
    pub content_hash: String,

    pub resolution: Resolution,

    /// Image container format, e.g. "JPEG"
    pub image_format: String,

    /// Path of the frame file inside the run's scratch directory
    pub local_path: PathBuf,

    /// Owning video identifier
    pub video_id: String,
}

/// Reference from a frame back to its position in the source video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceImageRef {
    pub frame_num: u64,
    pub source_video: String,
}

/// Frame metadata payload exchanged with the metadata service
///
/// The service fills `uuid` and `file_path` in its response; the
/// pipeline sends them empty on registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    #[serde(default)]
    pub uuid: String,

    #[serde(default)]
    pub file_path: String,

    /// Dataset (game title) this frame belongs to
    pub dataset: String,

    pub image_hash: String,

    pub image_resolution: Resolution,

    pub image_format: String,

    pub source_image_dict: SourceImageRef,

    #[serde(default)]
    pub task_attributes_dict: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub upload_date: String,
}

/// Split a bucket-qualified path into `(bucket, object_key)`
///
/// `ingress-video/S_123/abc.mp4` -> `("ingress-video", "S_123/abc.mp4")`
#[must_use]
pub fn separate_bucket_and_object(path: &str) -> (String, String) {
    match path.split_once('/') {
        Some((bucket, object)) => (bucket.to_string(), object.to_string()),
        None => (path.to_string(), String::new()),
    }
}
