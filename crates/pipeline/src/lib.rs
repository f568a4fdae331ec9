//! Gameplay video frame ingest pipeline
//!
//! Takes registered source videos from object storage, extracts and
//! deduplicates their key frames, uploads each accepted frame with an
//! embedding artifact, registers frame metadata and marks the video
//! processed. Batches run under bounded concurrency with per-item
//! failure isolation.

pub mod config;
pub mod persister;
pub mod scheduler;
pub mod video_pipeline;

pub use config::IngestConfig;
pub use persister::{frame_key_for, frame_prefix_for, FramePersister};
pub use scheduler::{BatchReport, BatchScheduler};
pub use video_pipeline::{
    AcquireMode, PipelineError, PipelineStage, ScratchDir, VideoPipeline,
};
