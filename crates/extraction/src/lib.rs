//! Key-frame extraction and deduplication
//!
//! Decodes a video's key frames, filters out visually redundant ones
//! with a two-tier similarity test, writes the survivors to a scratch
//! directory and content-addresses each saved file.

pub mod dedup;
pub mod features;
pub mod source;

use frame_ingest_common::{AcceptedFrame, ContentHasher, HashKind, IngestError, Result};
use std::path::Path;
use tracing::{debug, info};

pub use dedup::{Decision, DedupConfig, DedupWindow, FrameDeduplicator, RejectReason, Thumbnail};
pub use features::{Descriptor, DescriptorMatch, FeatureConfig};
pub use source::{probe_video, KeyFrameSource, VideoInfo};

/// Extraction parameters for one run
#[derive(Debug, Clone, Default)]
pub struct ExtractionConfig {
    pub dedup: DedupConfig,
    pub hash_kind: HashKind,
}

/// Extract, deduplicate and hash the key frames of one video
///
/// Accepted frames are saved as `{index:05}.jpg` under `output_dir`
/// and hashed from the saved bytes, so re-running over the same video
/// yields the same content addresses. Frames are judged strictly in
/// decode order; the returned list preserves that order.
pub fn extract_frames(
    video_path: &Path,
    output_dir: &Path,
    video_id: &str,
    config: &ExtractionConfig,
) -> Result<Vec<AcceptedFrame>> {
    let probe = probe_video(video_path)?;
    std::fs::create_dir_all(output_dir)?;

    let mut dedup = FrameDeduplicator::new(config.dedup.clone());
    let mut accepted = Vec::new();
    let mut candidates = 0u64;

    let source = KeyFrameSource::open(video_path, &probe)?;
    for item in source {
        let (frame, frame_number) = item?;
        candidates += 1;

        if !dedup.judge(&frame).is_accepted() {
            continue;
        }

        let local_path = output_dir.join(format!("{:05}.jpg", accepted.len()));
        frame.save(&local_path)?;
        let content_hash = ContentHasher::hash_file(config.hash_kind, &local_path)?;
        debug!(
            frame_number,
            hash = %content_hash,
            "accepted key frame {}",
            local_path.display()
        );

        accepted.push(AcceptedFrame {
            frame_number,
            content_hash,
            resolution: probe.resolution,
            image_format: "JPEG".to_string(),
            local_path,
            video_id: video_id.to_string(),
        });
    }

    if candidates == 0 {
        return Err(IngestError::NoKeyFrames);
    }

    info!(
        video_id,
        candidates,
        accepted = accepted.len(),
        "key-frame extraction finished"
    );
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_config_defaults() {
        let config = ExtractionConfig::default();
        assert_eq!(config.dedup.distance_threshold, 40);
        assert_eq!(config.dedup.match_ratio_threshold, 0.75);
        assert_eq!(config.dedup.min_matches, 8);
        assert_eq!(config.dedup.thumb_delta_threshold, 0.1);
        assert_eq!(config.dedup.window_size, 64);
        assert_eq!(config.hash_kind, HashKind::Blake2s256);
    }
}
