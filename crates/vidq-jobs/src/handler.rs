//! Job handlers: turn a claimed job into media work.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use vidq_core::{
    Error, Job, JobKind, MediaExecutor, ProcessingFlag, Result, Video, VideoRepository,
};

use crate::storage::StorageLayout;

/// Executes a claimed job.
///
/// `Ok` means the job is done; any error marks it failed. Handlers are
/// responsible for their own cleanup before returning an error.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<()>;
}

/// Handler for every [`JobKind`]: resize, format change, audio extraction.
pub struct MediaJobHandler {
    videos: Arc<dyn VideoRepository>,
    executor: Arc<dyn MediaExecutor>,
    storage: StorageLayout,
}

impl MediaJobHandler {
    pub fn new(
        videos: Arc<dyn VideoRepository>,
        executor: Arc<dyn MediaExecutor>,
        storage: StorageLayout,
    ) -> Self {
        Self {
            videos,
            executor,
            storage,
        }
    }

    pub fn storage(&self) -> &StorageLayout {
        &self.storage
    }

    /// Run one operation against `subject_id`.
    ///
    /// Every error leaves the operation's in-flight marker cleared so the
    /// same operation can be enqueued again.
    pub async fn run(&self, subject_id: &str, kind: &JobKind) -> Result<()> {
        let flag = kind.processing_flag();
        let video = match self.videos.get_video(subject_id).await {
            Ok(Some(video)) => video,
            Ok(None) => return Err(Error::SubjectNotFound(subject_id.to_string())),
            Err(err) => {
                self.clear_flag(subject_id, &flag).await;
                return Err(err);
            }
        };

        let source = self.storage.original(&video.video_id, &video.extension);
        let destination = self.destination(&video, kind);

        match self.produce(&video, kind, &source, &destination).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.remove_partial(&video.video_id, &destination).await;
                self.clear_flag(&video.video_id, &flag).await;
                Err(err)
            }
        }
    }

    fn destination(&self, video: &Video, kind: &JobKind) -> PathBuf {
        match kind {
            JobKind::Resize { width, height } => {
                self.storage
                    .resized(&video.video_id, *width, *height, &video.extension)
            }
            JobKind::ChangeFormat { format } => {
                self.storage.converted(&video.video_id, &format.to_lowercase())
            }
            JobKind::ExtractAudio => self.storage.audio(&video.video_id),
        }
    }

    /// Produce the artifact and clear the in-flight marker.
    async fn produce(
        &self,
        video: &Video,
        kind: &JobKind,
        source: &Path,
        destination: &Path,
    ) -> Result<()> {
        let video_id = video.video_id.as_str();
        match kind {
            JobKind::Resize { width, height } => {
                self.executor
                    .resize(source, destination, *width, *height)
                    .await?;
            }
            JobKind::ChangeFormat { format } => {
                self.executor
                    .change_format(source, destination, &format.to_lowercase())
                    .await?;
            }
            JobKind::ExtractAudio => {
                if !self.executor.has_audio_stream(source).await? {
                    return Err(Error::Executor(
                        "Video does not contain an audio track to extract".to_string(),
                    ));
                }
                self.executor.extract_audio(source, destination).await?;
            }
        }

        self.videos
            .set_processing(video_id, &kind.processing_flag(), false)
            .await?;
        if matches!(kind, JobKind::ExtractAudio) {
            self.videos.mark_audio_extracted(video_id).await?;
        }
        Ok(())
    }

    async fn remove_partial(&self, video_id: &str, destination: &Path) {
        if let Err(e) = self.storage.remove_artifact(destination).await {
            warn!(
                subsystem = "jobs",
                component = "handler",
                op = "clean_up",
                subject_id = %video_id,
                path = %destination.display(),
                error = %e,
                "Failed to remove partial artifact"
            );
        }
    }

    /// Best-effort reset of the in-flight marker.
    async fn clear_flag(&self, video_id: &str, flag: &ProcessingFlag) {
        if let Err(e) = self.videos.set_processing(video_id, flag, false).await {
            warn!(
                subsystem = "jobs",
                component = "handler",
                op = "clean_up",
                subject_id = %video_id,
                flag = %flag.key(),
                error = %e,
                "Failed to clear processing flag"
            );
        }
    }
}

#[async_trait]
impl JobHandler for MediaJobHandler {
    async fn execute(&self, job: &Job) -> Result<()> {
        let kind = job.kind()?;
        let start = Instant::now();

        self.run(&job.subject_id, &kind).await?;

        info!(
            subsystem = "jobs",
            component = "handler",
            op = kind.job_type(),
            job_id = %job.job_id,
            subject_id = %job.subject_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Media operation finished"
        );
        Ok(())
    }
}
