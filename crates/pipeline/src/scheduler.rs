//! Bounded concurrent batch execution
//!
//! One scheduler instance runs a batch of independent jobs under a
//! semaphore-capped pool. Failures never abort the batch; each failed
//! item's identifier lands in the report and the rest keep running.
//! The same scheduler drives both levels of the pipeline: videos
//! across a batch and frames within a video.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::error;

/// Outcome of one batch
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Identifiers of items whose job returned an error
    pub failed: Vec<String>,

    /// Sum of the per-item counters from successful jobs
    pub uploaded_frames: usize,
}

impl BatchReport {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Semaphore-capped job pool
pub struct BatchScheduler {
    limit: usize,
}

impl BatchScheduler {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// Run one job per item with at most `limit` in flight
    ///
    /// A job resolves to either a counter (typically frames uploaded)
    /// or the failing item's identifier and cause. This never returns
    /// an error itself; every failure is isolated into the report.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, job: F) -> BatchReport
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<usize, (String, anyhow::Error)>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let job = Arc::new(job);
        let (tx, mut rx) = mpsc::channel(items.len().max(1));

        for item in items {
            let semaphore = Arc::clone(&semaphore);
            let job = Arc::clone(&job);
            let tx = tx.clone();
            tokio::spawn(async move {
                // The semaphore is never closed while jobs are pending
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let outcome = job(item).await;
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut report = BatchReport::default();
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(count) => report.uploaded_frames += count,
                Err((id, cause)) => {
                    error!(item = %id, "batch item failed: {cause:#}");
                    report.failed.push(id);
                }
            }
        }
        report
    }
}
