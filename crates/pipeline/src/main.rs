use clap::{Parser, Subcommand};
use frame_ingest_extraction::ExtractionConfig;
use frame_ingest_pipeline::{
    AcquireMode, BatchReport, BatchScheduler, FramePersister, IngestConfig, VideoPipeline,
};
use frame_ingest_storage::{
    HttpImageEncoder, ImageEncoder, MetadataClient, ObjectStorage, S3ObjectStorage,
};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "frame-ingest", about = "Gameplay video frame ingest pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process registered videos: extract, deduplicate and persist frames
    Process {
        /// Specific video identifiers; all unprocessed videos when omitted
        #[arg(long = "video-id")]
        video_ids: Vec<String>,
    },

    /// Download a video from a URL, upload it and register its record
    IngestUrl {
        url: String,

        /// Owning game identifier
        #[arg(long)]
        game_id: i64,

        #[arg(long, default_value = "")]
        title: String,

        /// Run the processing pipeline immediately after ingesting
        #[arg(long)]
        and_process: bool,
    },
}

fn build_pipeline(config: &IngestConfig) -> anyhow::Result<Arc<VideoPipeline>> {
    let storage: Arc<dyn ObjectStorage> = Arc::new(S3ObjectStorage::new(config.s3.clone())?);
    let metadata = Arc::new(MetadataClient::new(config.metadata.clone())?);
    let encoder: Arc<dyn ImageEncoder> =
        Arc::new(HttpImageEncoder::new(config.encoder.clone()));
    let persister = Arc::new(FramePersister::new(
        Arc::clone(&storage),
        encoder,
        config.frame_bucket.clone(),
    ));
    Ok(Arc::new(VideoPipeline::new(
        storage,
        metadata,
        persister,
        config.clone(),
        ExtractionConfig::default(),
    )))
}

/// Fold acquisition failures into the batch report
fn merge_unacquired(mut report: BatchReport, unacquired: Vec<String>) -> BatchReport {
    report.failed.extend(unacquired);
    report
}

async fn process_batch(
    pipeline: Arc<VideoPipeline>,
    config: &IngestConfig,
    video_ids: Vec<String>,
) -> anyhow::Result<bool> {
    let mut videos = Vec::new();
    let mut unacquired = Vec::new();
    if video_ids.is_empty() {
        videos = pipeline.list_unprocessed().await?;
        info!(count = videos.len(), "processing all unprocessed videos");
    } else {
        // A bad id fails that video alone, never the rest of the batch
        for video_id in video_ids {
            match pipeline.acquire(AcquireMode::ById(video_id.clone())).await {
                Ok(video) => videos.push(video),
                Err(e) => {
                    error!(video_id = %video_id, "failed to acquire video: {e:#}");
                    unacquired.push(video_id);
                }
            }
        }
    }

    let total = videos.len() + unacquired.len();
    let report = {
        let pipeline = Arc::clone(&pipeline);
        BatchScheduler::new(config.video_workers)
            .run(videos, move |video| {
                let pipeline = Arc::clone(&pipeline);
                async move {
                    let video_id = video.video_id.clone();
                    pipeline
                        .process(video)
                        .await
                        .map_err(|e| (video_id, anyhow::Error::from(e)))
                }
            })
            .await
    };
    let report = merge_unacquired(report, unacquired);

    info!(
        total,
        failed = report.failed.len(),
        uploaded_frames = report.uploaded_frames,
        "batch finished"
    );
    if !report.all_succeeded() {
        std::fs::write(
            "failed_list.json",
            serde_json::to_vec_pretty(&report.failed)?,
        )?;
        error!(
            "{} of {total} videos failed; identifiers written to failed_list.json",
            report.failed.len()
        );
        return Ok(false);
    }
    Ok(true)
}

async fn run(command: Commands, config: IngestConfig) -> anyhow::Result<bool> {
    let pipeline = build_pipeline(&config)?;
    match command {
        Commands::Process { video_ids } => process_batch(pipeline, &config, video_ids).await,
        Commands::IngestUrl {
            url,
            game_id,
            title,
            and_process,
        } => {
            let video = pipeline
                .acquire(AcquireMode::ByUrl {
                    url,
                    game_id,
                    title,
                })
                .await?;
            info!(video_id = %video.video_id, "video registered");
            if and_process {
                let uploaded = pipeline.process(video).await?;
                info!(uploaded, "video processed");
            }
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::default();
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        std::process::exit(1);
    }

    match run(cli.command, config).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("pipeline failed: {e:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unacquired_ids_land_in_report() {
        let report = BatchReport {
            failed: vec!["vid-2".to_string()],
            uploaded_frames: 5,
        };
        let merged = merge_unacquired(report, vec!["vid-9".to_string()]);
        assert_eq!(merged.failed, vec!["vid-2", "vid-9"]);
        assert_eq!(merged.uploaded_frames, 5);
        assert!(!merged.all_succeeded());
    }

    #[test]
    fn test_merge_preserves_clean_report() {
        let merged = merge_unacquired(BatchReport::default(), Vec::new());
        assert!(merged.all_succeeded());
    }
}
