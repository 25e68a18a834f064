//! In-memory collaborators for coordinator and producer tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

use vidq_jobs::{
    ActivationGate, CoordinatorBuilder, Error, ErrorCallbackRegistry, Job, JobRepository,
    JobStatus, MediaExecutor, MediaJobHandler, NewJob, ProcessingFlag, QueueStats, Result,
    StorageLayout, Video, VideoRepository, WorkerConfig, WorkerEvent, WorkerHandle, WorkerId,
};

// =============================================================================
// JOBS
// =============================================================================

/// Job queue held in a mutex; every operation is atomic under the lock.
#[derive(Default)]
pub struct MemoryJobs {
    rows: Mutex<Vec<Job>>,
}

impl MemoryJobs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a row with an arbitrary payload, bypassing kind serialization.
    pub fn insert_raw(&self, job_id: &str, job_type: &str, subject_id: &str, payload: JsonValue) {
        let mut rows = self.rows.lock().unwrap();
        let now = Utc::now();
        let id = rows.len() as i64 + 1;
        rows.push(Job {
            id,
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            subject_id: subject_id.to_string(),
            status: JobStatus::Pending,
            payload,
            worker_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        });
    }

    pub fn job(&self, job_id: &str) -> Job {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.job_id == job_id)
            .cloned()
            .unwrap_or_else(|| panic!("no job {job_id}"))
    }

    /// Push a row's `updated_at` into the past.
    pub fn age(&self, job_id: &str, by: Duration) {
        let mut rows = self.rows.lock().unwrap();
        let job = rows.iter_mut().find(|j| j.job_id == job_id).unwrap();
        job.updated_at -= chrono::Duration::from_std(by).unwrap();
    }

    fn revert(job: &mut Job) {
        job.status = JobStatus::Pending;
        job.worker_id = None;
        job.started_at = None;
        job.updated_at = Utc::now();
    }

    fn resolve(
        &self,
        row_id: i64,
        worker: &WorkerId,
        to: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let job = rows
            .iter_mut()
            .find(|j| j.id == row_id)
            .ok_or_else(|| Error::NotFound(format!("job row {row_id}")))?;
        if job.status != JobStatus::Processing {
            return Err(Error::InvalidTransition {
                row_id,
                from: job.status,
                to,
            });
        }
        if job.worker_id.as_deref() != Some(worker.as_str()) {
            return Err(Error::NotOwner {
                row_id,
                worker_id: worker.to_string(),
            });
        }
        let now = Utc::now();
        job.status = to;
        job.worker_id = None;
        job.error_message = error.map(str::to_string);
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl JobRepository for MemoryJobs {
    async fn insert(&self, job: &NewJob) -> Result<Job> {
        let payload = job.kind.to_payload()?;
        {
            let rows = self.rows.lock().unwrap();
            if rows.iter().any(|j| j.job_id == job.job_id) {
                return Err(Error::DuplicateJob(job.job_id.clone()));
            }
        }
        self.insert_raw(&job.job_id, job.kind.job_type(), &job.subject_id, payload);
        Ok(self.job(&job.job_id))
    }

    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<Job>> {
        let mut rows = self.rows.lock().unwrap();
        let next = rows
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| (j.created_at, j.id));
        Ok(next.map(|job| {
            let now = Utc::now();
            job.status = JobStatus::Processing;
            job.worker_id = Some(worker.to_string());
            job.started_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn mark_completed(&self, row_id: i64, worker: &WorkerId) -> Result<()> {
        self.resolve(row_id, worker, JobStatus::Completed, None)
    }

    async fn mark_failed(&self, row_id: i64, worker: &WorkerId, error: &str) -> Result<()> {
        self.resolve(row_id, worker, JobStatus::Failed, Some(error))
    }

    async fn reset_orphans(&self, worker: &WorkerId) -> Result<Vec<Job>> {
        let mut rows = self.rows.lock().unwrap();
        let mut reset = Vec::new();
        for job in rows.iter_mut().filter(|j| {
            j.status == JobStatus::Processing && j.worker_id.as_deref() == Some(worker.as_str())
        }) {
            Self::revert(job);
            reset.push(job.clone());
        }
        Ok(reset)
    }

    async fn reset_stale(&self, older_than: Duration) -> Result<Vec<Job>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap();
        let mut rows = self.rows.lock().unwrap();
        let mut reset = Vec::new();
        for job in rows
            .iter_mut()
            .filter(|j| j.status == JobStatus::Processing && j.updated_at < cutoff)
        {
            Self::revert(job);
            reset.push(job.clone());
        }
        Ok(reset)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.job_id == job_id)
            .cloned())
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(self.queue_stats().await?.pending)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let rows = self.rows.lock().unwrap();
        let mut stats = QueueStats::default();
        for job in rows.iter() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

// =============================================================================
// VIDEOS
// =============================================================================

#[derive(Default)]
pub struct MemoryVideos {
    videos: Mutex<HashMap<String, Video>>,
}

impl MemoryVideos {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, video_id: &str, extension: &str) {
        self.videos.lock().unwrap().insert(
            video_id.to_string(),
            Video {
                video_id: video_id.to_string(),
                name: format!("{video_id}.{extension}"),
                extension: extension.to_string(),
                extracted_audio: false,
                audio_processing: false,
                resizes: HashMap::new(),
                formats: HashMap::new(),
            },
        );
    }

    pub fn video(&self, video_id: &str) -> Video {
        self.videos.lock().unwrap()[video_id].clone()
    }

    pub fn is_processing(&self, video_id: &str, flag: &ProcessingFlag) -> bool {
        self.video(video_id).is_processing(flag)
    }
}

#[async_trait]
impl VideoRepository for MemoryVideos {
    async fn get_video(&self, video_id: &str) -> Result<Option<Video>> {
        Ok(self.videos.lock().unwrap().get(video_id).cloned())
    }

    async fn set_processing(
        &self,
        video_id: &str,
        flag: &ProcessingFlag,
        processing: bool,
    ) -> Result<()> {
        let mut videos = self.videos.lock().unwrap();
        let Some(video) = videos.get_mut(video_id) else {
            return Ok(());
        };
        let state = vidq_jobs::OperationState { processing };
        match flag {
            ProcessingFlag::Resize { .. } => {
                video.resizes.insert(flag.key(), state);
            }
            ProcessingFlag::Format(format) => {
                video.formats.insert(format.clone(), state);
            }
            ProcessingFlag::Audio => video.audio_processing = processing,
        }
        Ok(())
    }

    async fn mark_audio_extracted(&self, video_id: &str) -> Result<()> {
        if let Some(video) = self.videos.lock().unwrap().get_mut(video_id) {
            video.extracted_audio = true;
        }
        Ok(())
    }
}

// =============================================================================
// EXECUTOR
// =============================================================================

/// Executor that writes a placeholder output, optionally sleeps, and fails
/// on demand.
#[derive(Default)]
pub struct ScriptedExecutor {
    failure: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following call fail with `message` after writing output.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of operations observed running at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn perform(&self, destination: &Path) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, b"partial output").await?;

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(message) => Err(Error::Executor(message)),
            None => Ok(destination.to_path_buf()),
        }
    }
}

#[async_trait]
impl MediaExecutor for ScriptedExecutor {
    async fn resize(&self, _: &Path, destination: &Path, _: u32, _: u32) -> Result<PathBuf> {
        self.perform(destination).await
    }

    async fn change_format(&self, _: &Path, destination: &Path, _: &str) -> Result<PathBuf> {
        self.perform(destination).await
    }

    async fn extract_audio(&self, _: &Path, destination: &Path) -> Result<PathBuf> {
        self.perform(destination).await
    }

    async fn has_audio_stream(&self, _: &Path) -> Result<bool> {
        Ok(true)
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// Everything a coordinator scenario needs, wired to in-memory parts.
pub struct Harness {
    pub jobs: Arc<MemoryJobs>,
    pub videos: Arc<MemoryVideos>,
    pub executor: Arc<ScriptedExecutor>,
    pub callbacks: ErrorCallbackRegistry,
    pub storage: StorageLayout,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            jobs: MemoryJobs::new(),
            videos: MemoryVideos::new(),
            executor: ScriptedExecutor::new(),
            callbacks: ErrorCallbackRegistry::new(),
            storage: StorageLayout::new(dir.path()),
            _dir: dir,
        }
    }

    pub fn producer(&self) -> vidq_jobs::JobProducer {
        vidq_jobs::JobProducer::new(
            self.jobs.clone(),
            self.videos.clone(),
            self.callbacks.clone(),
        )
    }

    pub fn builder(&self, config: WorkerConfig) -> CoordinatorBuilder {
        let handler = MediaJobHandler::new(
            self.videos.clone(),
            self.executor.clone(),
            self.storage.clone(),
        );
        CoordinatorBuilder::new(self.jobs.clone(), Arc::new(handler))
            .with_config(config)
            .with_callbacks(self.callbacks.clone())
    }

    /// Start a designated coordinator and open its gate.
    pub fn start(&self, config: WorkerConfig) -> (WorkerHandle, broadcast::Receiver<WorkerEvent>) {
        let handle = self.builder(config.with_designated(true)).build().start();
        let events = handle.events();
        handle.gate().mark_store_ready();
        (handle, events)
    }
}

pub fn fast_config() -> WorkerConfig {
    WorkerConfig::default().with_poll_interval(10)
}

/// Receive events until one matches, failing after a few seconds.
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<WorkerEvent>, pred: F) -> WorkerEvent
where
    F: Fn(&WorkerEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Gate that is already fully open.
pub fn open_gate() -> ActivationGate {
    let gate = ActivationGate::new();
    gate.designate();
    gate.mark_store_ready();
    gate
}
