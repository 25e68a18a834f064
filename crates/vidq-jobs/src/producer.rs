//! Producer API: enqueue jobs and observe their outcome.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use vidq_core::{Error, Job, JobKind, JobRepository, NewJob, Result, VideoRepository};

use crate::callbacks::ErrorCallbackRegistry;

/// Enqueues jobs against the shared store.
///
/// Any process may enqueue; only the designated coordinator executes.
#[derive(Clone)]
pub struct JobProducer {
    jobs: Arc<dyn JobRepository>,
    videos: Arc<dyn VideoRepository>,
    callbacks: ErrorCallbackRegistry,
}

impl JobProducer {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        videos: Arc<dyn VideoRepository>,
        callbacks: ErrorCallbackRegistry,
    ) -> Self {
        Self {
            jobs,
            videos,
            callbacks,
        }
    }

    pub fn callbacks(&self) -> &ErrorCallbackRegistry {
        &self.callbacks
    }

    /// Validate, mark the subject's operation in flight, and insert the job.
    ///
    /// Returns once the row is durably stored. If the insert fails the
    /// in-flight marker is cleared again.
    ///
    /// A marker that is already set does not block the job: it is also left
    /// behind by rows whose worker died, and re-enqueueing under a new job id
    /// is how such an operation is retried.
    pub async fn enqueue(&self, job: NewJob) -> Result<Job> {
        job.validate()?;

        let video = self
            .videos
            .get_video(&job.subject_id)
            .await?
            .ok_or_else(|| Error::SubjectNotFound(job.subject_id.clone()))?;

        if matches!(job.kind, JobKind::ExtractAudio) && video.extracted_audio {
            return Err(Error::InvalidJob(
                "Audio has already been extracted".to_string(),
            ));
        }

        let flag = job.kind.processing_flag();
        self.videos
            .set_processing(&job.subject_id, &flag, true)
            .await?;

        match self.jobs.insert(&job).await {
            Ok(stored) => {
                info!(
                    subsystem = "jobs",
                    component = "producer",
                    op = "enqueue",
                    job_id = %stored.job_id,
                    job_type = %stored.job_type,
                    subject_id = %stored.subject_id,
                    "Job enqueued"
                );
                Ok(stored)
            }
            Err(err) => {
                if let Err(e) = self
                    .videos
                    .set_processing(&job.subject_id, &flag, false)
                    .await
                {
                    warn!(
                        subsystem = "jobs",
                        component = "producer",
                        op = "enqueue",
                        job_id = %job.job_id,
                        error = %e,
                        "Failed to clear processing flag after insert error"
                    );
                }
                Err(err)
            }
        }
    }

    /// Enqueue with a failure callback.
    ///
    /// The callback is registered before the insert so a fast failure in
    /// this process cannot be resolved ahead of registration. It is removed
    /// again if the job is not enqueued. A job id that already has a
    /// registration is rejected as a duplicate, leaving that one in place.
    pub async fn enqueue_with_callback<F>(&self, job: NewJob, callback: F) -> Result<Job>
    where
        F: FnOnce(&Error, &JsonValue) + Send + 'static,
    {
        let job_id = job.job_id.clone();
        if !self.callbacks.try_register(job_id.clone(), callback) {
            return Err(Error::DuplicateJob(job_id));
        }

        let result = self.enqueue(job).await;
        if result.is_err() {
            self.callbacks.unregister(&job_id);
        }
        result
    }

    /// Register a failure callback for an already enqueued job.
    ///
    /// Only fires if the job is executed by a coordinator in this process.
    pub fn register_error_callback<F>(&self, job_id: impl Into<String>, callback: F)
    where
        F: FnOnce(&Error, &JsonValue) + Send + 'static,
    {
        self.callbacks.register(job_id, callback);
    }

    /// Current durable state of a job, including its failure message.
    pub async fn status(&self, job_id: &str) -> Result<Option<Job>> {
        self.jobs.get(job_id).await
    }
}
