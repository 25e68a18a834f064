//! Core trait definitions for the queue's collaborators.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::{Job, NewJob, ProcessingFlag, QueueStats, Result, Video, WorkerId};

// =============================================================================
// REPOSITORY TRAITS
// =============================================================================

/// Durable job queue.
///
/// Every operation is atomic with respect to concurrent callers in any
/// process; the coordinator relies on this and does no locking of its own.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new `pending` job.
    async fn insert(&self, job: &NewJob) -> Result<Job>;

    /// Claim the oldest pending job for `worker`.
    ///
    /// Rows locked by a concurrent claimant are skipped, never waited on.
    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<Job>>;

    /// Mark a job `worker` holds in `processing` as completed.
    async fn mark_completed(&self, row_id: i64, worker: &WorkerId) -> Result<()>;

    /// Mark a job `worker` holds in `processing` as failed, recording the error.
    async fn mark_failed(&self, row_id: i64, worker: &WorkerId, error: &str) -> Result<()>;

    /// Revert every job `worker` holds in `processing` back to `pending`.
    async fn reset_orphans(&self, worker: &WorkerId) -> Result<Vec<Job>>;

    /// Revert `processing` jobs not updated within `older_than`, whoever owns them.
    ///
    /// Nothing refreshes a row while its job runs, so `older_than` must exceed
    /// the longest job or a live job is handed to a second claimant.
    async fn reset_stale(&self, older_than: Duration) -> Result<Vec<Job>>;

    /// Get a job by its caller-visible id.
    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Number of pending jobs.
    async fn pending_count(&self) -> Result<i64>;

    /// Counts per status.
    async fn queue_stats(&self) -> Result<QueueStats>;
}

/// Access to the media assets jobs operate on.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Load a video by id.
    async fn get_video(&self, video_id: &str) -> Result<Option<Video>>;

    /// Set or clear the in-flight marker for one operation.
    async fn set_processing(
        &self,
        video_id: &str,
        flag: &ProcessingFlag,
        processing: bool,
    ) -> Result<()>;

    /// Record that the audio track has been extracted.
    async fn mark_audio_extracted(&self, video_id: &str) -> Result<()>;
}

// =============================================================================
// MEDIA EXECUTOR
// =============================================================================

/// Performs the actual media work.
///
/// Each call resolves once the output is fully written (or the tool failed);
/// on success it returns the destination path.
#[async_trait]
pub trait MediaExecutor: Send + Sync {
    /// Scale a video.
    async fn resize(&self, source: &Path, destination: &Path, width: u32, height: u32)
        -> Result<PathBuf>;

    /// Re-encode into another container format.
    async fn change_format(&self, source: &Path, destination: &Path, format: &str)
        -> Result<PathBuf>;

    /// Extract the audio track.
    async fn extract_audio(&self, source: &Path, destination: &Path) -> Result<PathBuf>;

    /// Whether the source has at least one audio stream.
    async fn has_audio_stream(&self, source: &Path) -> Result<bool>;
}
