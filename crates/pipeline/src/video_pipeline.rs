//! Per-video processing pipeline
//!
//! A video moves through fixed stages: acquire the file, extract and
//! deduplicate key frames, persist frames with their embeddings, then
//! record completion in the metadata service. A failure pins the video
//! to the stage it died in; other videos in the batch are unaffected.
//! Scratch space is dropped on every exit path, success or not.

use crate::config::IngestConfig;
use crate::persister::{frame_prefix_for, FramePersister};
use crate::scheduler::BatchScheduler;
use frame_ingest_common::{
    separate_bucket_and_object, AcceptedFrame, ContentHasher, FrameRecord, HashKind,
    SourceImageRef, VideoRecord,
};
use frame_ingest_extraction::{extract_frames, probe_video, ExtractionConfig};
use frame_ingest_storage::{MetadataClient, ObjectStorage};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Where a video is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Pending,
    Acquiring,
    Extracting,
    Persisting,
    RecordingMetadata,
    Completed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Pending => "pending",
            PipelineStage::Acquiring => "acquiring",
            PipelineStage::Extracting => "extracting",
            PipelineStage::Persisting => "persisting",
            PipelineStage::RecordingMetadata => "recording-metadata",
            PipelineStage::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// One video's failure, pinned to the stage it happened in
#[derive(Debug, Error)]
#[error("video {video_id} failed while {stage}: {source}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub video_id: String,
    #[source]
    pub source: anyhow::Error,
}

/// How the pipeline obtains the video to process
pub enum AcquireMode {
    /// A video already registered with the metadata service
    ById(String),

    /// A fresh video fetched from a URL, registered on the way in
    ByUrl {
        url: String,
        game_id: i64,
        title: String,
    },
}

/// Scratch directory removed on drop
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(root: &Path, video_id: &str) -> std::io::Result<Self> {
        let path = root.join(video_id);
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("failed to remove scratch dir {}: {e}", self.path.display());
        }
    }
}

/// Content-keyed identifier for a URL-ingested video
///
/// Derived from the file hash so the same bytes always map to the
/// same id and object key, regardless of how often they are fetched.
fn video_id_for_hash(file_hash: &str) -> String {
    file_hash.chars().take(16).collect()
}

fn frame_record(frame: &AcceptedFrame, dataset: &str) -> FrameRecord {
    FrameRecord {
        uuid: String::new(),
        file_path: String::new(),
        dataset: dataset.to_string(),
        image_hash: frame.content_hash.clone(),
        image_resolution: frame.resolution,
        image_format: frame.image_format.clone(),
        source_image_dict: SourceImageRef {
            frame_num: frame.frame_number,
            source_video: frame.video_id.clone(),
        },
        task_attributes_dict: serde_json::Map::new(),
        upload_date: chrono::Utc::now().to_rfc3339(),
    }
}

/// Runs one video end to end
pub struct VideoPipeline {
    storage: Arc<dyn ObjectStorage>,
    metadata: Arc<MetadataClient>,
    persister: Arc<FramePersister>,
    config: IngestConfig,
    extraction: ExtractionConfig,
}

impl VideoPipeline {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        metadata: Arc<MetadataClient>,
        persister: Arc<FramePersister>,
        config: IngestConfig,
        extraction: ExtractionConfig,
    ) -> Self {
        Self {
            storage,
            metadata,
            persister,
            config,
            extraction,
        }
    }

    fn fail(
        &self,
        stage: PipelineStage,
        video_id: &str,
        source: impl Into<anyhow::Error>,
    ) -> PipelineError {
        PipelineError {
            stage,
            video_id: video_id.to_string(),
            source: source.into(),
        }
    }

    /// Fetch every video the metadata service has not seen processed
    pub async fn list_unprocessed(&self) -> Result<Vec<VideoRecord>, PipelineError> {
        self.metadata
            .list_unprocessed_videos()
            .await
            .map_err(|e| self.fail(PipelineStage::Pending, "batch", e))
    }

    /// Resolve an acquire mode to a registered video record
    pub async fn acquire(&self, mode: AcquireMode) -> Result<VideoRecord, PipelineError> {
        match mode {
            AcquireMode::ById(video_id) => self
                .metadata
                .get_video_by_id(&video_id)
                .await
                .map_err(|e| self.fail(PipelineStage::Acquiring, &video_id, e)),
            AcquireMode::ByUrl {
                url,
                game_id,
                title,
            } => self.ingest_from_url(&url, game_id, &title).await,
        }
    }

    /// Fetch a video from a URL, upload it and register its record
    ///
    /// Identity is content-keyed: the video id and object key derive
    /// from the file hash, so re-ingesting the same bytes skips the
    /// upload and returns the already-registered record.
    async fn ingest_from_url(
        &self,
        url: &str,
        game_id: i64,
        title: &str,
    ) -> Result<VideoRecord, PipelineError> {
        let stage = PipelineStage::Acquiring;

        let extension = url
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| ext.len() <= 4 && ext.chars().all(char::is_alphanumeric))
            .unwrap_or("mp4")
            .to_string();

        // The id is not known until the bytes are hashed, so the
        // download lands in a uniquely named scratch dir
        let scratch_key = format!("ingest-{}", uuid::Uuid::new_v4());
        let scratch = ScratchDir::create(&self.config.work_dir, &scratch_key)
            .map_err(|e| self.fail(stage, url, e))?;
        let local = scratch.path().join(format!("download.{extension}"));

        let mut response = reqwest::get(url)
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| self.fail(stage, url, e))?;
        let mut file = tokio::fs::File::create(&local)
            .await
            .map_err(|e| self.fail(stage, url, e))?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.fail(stage, url, e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| self.fail(stage, url, e))?;
        }
        file.flush()
            .await
            .map_err(|e| self.fail(stage, url, e))?;

        let (file_hash, probe) = {
            let path = local.clone();
            tokio::task::spawn_blocking(move || {
                let hash = ContentHasher::hash_file(HashKind::Blake2s256, &path)?;
                let probe = probe_video(&path)?;
                Ok::<_, frame_ingest_common::IngestError>((hash, probe))
            })
            .await
            .map_err(|e| self.fail(stage, url, e))?
            .map_err(|e| self.fail(stage, url, e))?
        };
        let filesize = std::fs::metadata(&local)
            .map_err(|e| self.fail(stage, url, e))?
            .len() as i64;

        let video_id = video_id_for_hash(&file_hash);
        let object_key = format!("S_{game_id}/{video_id}.{extension}");
        let record = VideoRecord {
            file_hash,
            video_id: video_id.clone(),
            file_path: format!("{}/{}", self.config.video_bucket, object_key),
            video_url: url.to_string(),
            video_title: title.to_string(),
            video_description: String::new(),
            video_resolution: format!("{}p", probe.resolution.height),
            video_extension: extension,
            video_length: 0,
            video_filesize: filesize,
            video_frame_rate: probe.frame_rate.round() as i64,
            video_language: String::new(),
            processed: false,
            game_id,
            upload_date: chrono::Utc::now().to_rfc3339(),
        };

        self.storage
            .store_path_if_absent(&self.config.video_bucket, &object_key, &local)
            .await
            .map_err(|e| self.fail(stage, &video_id, e))?;
        match self.metadata.register_video(&record).await {
            Ok(_) => {
                info!(
                    video_id = %record.video_id,
                    filesize,
                    resolution = %probe.resolution,
                    "ingested video from URL"
                );
                Ok(record)
            }
            Err(e) if e.is_already_exists() => {
                info!(video_id = %video_id, "video already registered, reusing its record");
                self.metadata
                    .get_video_by_id(&video_id)
                    .await
                    .map_err(|e| self.fail(stage, &video_id, e))
            }
            Err(e) => Err(self.fail(stage, &video_id, e)),
        }
    }

    /// Process one registered video, returning how many frames were uploaded
    pub async fn process(&self, video: VideoRecord) -> Result<usize, PipelineError> {
        let video_id = video.video_id.clone();
        let mut video = video;

        // Acquiring
        let stage = PipelineStage::Acquiring;
        let scratch = ScratchDir::create(&self.config.work_dir, &video_id)
            .map_err(|e| self.fail(stage, &video_id, e))?;
        let local = scratch.path().join(video.local_filename());
        let (bucket, object_key) = separate_bucket_and_object(&video.file_path);
        self.storage
            .download_to_path(&bucket, &object_key, &local)
            .await
            .map_err(|e| self.fail(stage, &video_id, e))?;

        // Older records carry a placeholder size; refresh it from disk
        if video.video_filesize <= 0 {
            let filesize = std::fs::metadata(&local)
                .map_err(|e| self.fail(stage, &video_id, e))?
                .len() as i64;
            video.video_filesize = filesize;
            match self.metadata.update_video(&video).await {
                Ok(_) => info!(video_id = %video_id, filesize, "refreshed video filesize"),
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(self.fail(stage, &video_id, e)),
            }
        }

        // Extracting
        let stage = PipelineStage::Extracting;
        let frames = {
            let video_path = local.clone();
            let output_dir = scratch.path().join("frames");
            let vid = video_id.clone();
            let config = self.extraction.clone();
            tokio::task::spawn_blocking(move || {
                extract_frames(&video_path, &output_dir, &vid, &config)
            })
            .await
            .map_err(|e| self.fail(stage, &video_id, e))?
            .map_err(|e| self.fail(stage, &video_id, e))?
        };
        let manifest = serde_json::to_vec_pretty(&frames)
            .map_err(|e| self.fail(stage, &video_id, e))?;
        std::fs::write(scratch.path().join("extracted_frames.json"), manifest)
            .map_err(|e| self.fail(stage, &video_id, e))?;

        // Persisting
        let stage = PipelineStage::Persisting;
        let game = self
            .metadata
            .get_game(&video.game_id.to_string())
            .await
            .map_err(|e| self.fail(stage, &video_id, e))?;
        match self
            .metadata
            .add_dataset(&game.title, &self.config.frame_bucket)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(self.fail(stage, &video_id, e)),
        }

        let total = frames.len();
        let items: Vec<(usize, AcceptedFrame)> = frames.into_iter().enumerate().collect();
        let report = {
            let persister = Arc::clone(&self.persister);
            let metadata = Arc::clone(&self.metadata);
            let dataset = game.title.clone();
            let prefix = frame_prefix_for(&video.file_path);
            let vid = video_id.clone();
            BatchScheduler::new(self.config.frame_workers)
                .run(items, move |(index, frame)| {
                    let persister = Arc::clone(&persister);
                    let metadata = Arc::clone(&metadata);
                    let dataset = dataset.clone();
                    let prefix = prefix.clone();
                    let vid = vid.clone();
                    async move {
                        let id = format!("{vid}#{}", frame.frame_number);
                        let record = frame_record(&frame, &dataset);
                        match metadata.register_frame(&record).await {
                            Ok(_) => {}
                            Err(e) if e.is_already_exists() => {}
                            Err(e) => return Err((id, e.into())),
                        }
                        let uploaded = persister
                            .persist(&frame, &prefix, index)
                            .await
                            .map_err(|e| (id, anyhow::Error::from(e)))?;
                        Ok(usize::from(uploaded))
                    }
                })
                .await
        };
        if !report.all_succeeded() {
            return Err(self.fail(
                stage,
                &video_id,
                anyhow::anyhow!("{} of {total} frames failed", report.failed.len()),
            ));
        }

        // RecordingMetadata
        let stage = PipelineStage::RecordingMetadata;
        video.processed = true;
        match self.metadata.update_video(&video).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(self.fail(stage, &video_id, e)),
        }

        info!(
            video_id = %video_id,
            frames = total,
            uploaded = report.uploaded_frames,
            "video completed"
        );
        Ok(report.uploaded_frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_ingest_common::Resolution;

    #[test]
    fn test_scratch_dir_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchDir::create(root.path(), "vid-1").unwrap();
            std::fs::write(scratch.path().join("leftover.bin"), b"x").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(PipelineStage::Acquiring.to_string(), "acquiring");
        assert_eq!(
            PipelineStage::RecordingMetadata.to_string(),
            "recording-metadata"
        );
    }

    #[test]
    fn test_frame_record_fields() {
        let frame = AcceptedFrame {
            frame_number: 7,
            content_hash: "cafe".to_string(),
            resolution: Resolution {
                width: 640,
                height: 480,
            },
            image_format: "JPEG".to_string(),
            local_path: PathBuf::from("/tmp/00007.jpg"),
            video_id: "vid-9".to_string(),
        };
        let record = frame_record(&frame, "Dota 2");
        assert_eq!(record.dataset, "Dota 2");
        assert_eq!(record.image_hash, "cafe");
        assert_eq!(record.source_image_dict.frame_num, 7);
        assert_eq!(record.source_image_dict.source_video, "vid-9");
        assert!(record.uuid.is_empty());
        assert!(record.file_path.is_empty());
    }

    #[test]
    fn test_url_ingest_identity_is_content_keyed() {
        let hash = "0f1e2d3c4b5a69788796a5b4c3d2e1f0";
        // Same bytes, same id: repeat ingestion targets one object key
        assert_eq!(video_id_for_hash(hash), video_id_for_hash(hash));
        assert_eq!(video_id_for_hash(hash), "0f1e2d3c4b5a6978");
        assert_ne!(
            video_id_for_hash(hash),
            video_id_for_hash("ffee00112233445566778899aabbccdd")
        );
    }

    #[test]
    fn test_pipeline_error_carries_stage() {
        let err = PipelineError {
            stage: PipelineStage::Persisting,
            video_id: "vid-2".to_string(),
            source: anyhow::anyhow!("boom"),
        };
        let message = err.to_string();
        assert!(message.contains("vid-2"));
        assert!(message.contains("persisting"));
    }
}
