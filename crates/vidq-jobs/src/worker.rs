//! Job coordinator: claims jobs from the shared queue and runs them one at
//! a time.
//!
//! Lifecycle:
//! 1. Wait on the [`ActivationGate`] (designated *and* store ready).
//! 2. Revert rows this identity left in `processing` (and, if configured,
//!    any row gone stale).
//! 3. Poll on a fixed interval. A tick is skipped while the single slot is
//!    busy; otherwise the next pending job is claimed and executed on a
//!    spawned task that holds the slot until the outcome is recorded.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use vidq_core::defaults::{EVENT_BUS_CAPACITY, JOB_POLL_INTERVAL_MS};
use vidq_core::{Error, Job, JobRepository, Result, WorkerId};

use crate::callbacks::{panic_message, ErrorCallbackRegistry};
use crate::gate::ActivationGate;
use crate::handler::JobHandler;

/// Configuration for the job coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Whether this process is the fleet's job processor.
    pub designated: bool,
    /// Stable fleet slot; `None` uses an ephemeral identity.
    pub slot: Option<usize>,
    /// Revert `processing` rows older than this at startup, whoever owns them.
    pub stale_after: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            designated: false,
            slot: None,
            stale_after: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_POLL_INTERVAL_MS` | `2000` | Polling interval |
    /// | `JOB_LEADER` | unset | `1`/`true` designates this process |
    /// | `WORKER_SLOT` | unset | Stable identity `slot-N` |
    /// | `JOB_STALE_AFTER_SECS` | unset | Startup staleness recovery |
    pub fn from_env() -> Self {
        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_POLL_INTERVAL_MS)
            .max(1);

        let designated = std::env::var("JOB_LEADER")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let slot = std::env::var("WORKER_SLOT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        let stale_after = std::env::var("JOB_STALE_AFTER_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            poll_interval_ms,
            designated,
            slot,
            stale_after,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_designated(mut self, designated: bool) -> Self {
        self.designated = designated;
        self
    }

    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with_stale_after(mut self, after: Duration) -> Self {
        self.stale_after = Some(after);
        self
    }

    /// Identity for a coordinator built from this config.
    pub fn worker_id(&self) -> WorkerId {
        self.slot.map(WorkerId::slot).unwrap_or_else(WorkerId::ephemeral)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Event emitted by the job coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Gate opened; the poll loop is about to start.
    WorkerStarted { worker_id: String },
    /// Startup recovery reverted `count` rows to pending.
    OrphansRecovered { count: usize },
    JobStarted { job_id: String, job_type: String },
    JobCompleted {
        job_id: String,
        job_type: String,
        duration_ms: u64,
    },
    JobFailed {
        job_id: String,
        job_type: String,
        error: String,
    },
    WorkerStopped,
}

/// Handle for controlling a running coordinator.
///
/// Dropping the handle stops the coordinator after its in-flight job.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    gate: ActivationGate,
    worker_id: WorkerId,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// The gate the coordinator is waiting on.
    pub fn gate(&self) -> &ActivationGate {
        &self.gate
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Get a receiver for coordinator events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Stop polling and wait for the in-flight job, if any, to finish.
    pub async fn shutdown(self) -> Result<()> {
        // A closed channel means the loop already exited.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Coordinator task failed: {e}")))
    }
}

/// Releases the execution slot when dropped, including on panic.
struct SlotGuard(Arc<AtomicBool>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Claims and runs jobs for one worker identity.
pub struct JobCoordinator {
    config: WorkerConfig,
    worker_id: WorkerId,
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn JobHandler>,
    callbacks: ErrorCallbackRegistry,
    gate: ActivationGate,
    event_tx: broadcast::Sender<WorkerEvent>,
    busy: Arc<AtomicBool>,
}

impl JobCoordinator {
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn gate(&self) -> &ActivationGate {
        &self.gate
    }

    pub fn callbacks(&self) -> &ErrorCallbackRegistry {
        &self.callbacks
    }

    /// Get a receiver for coordinator events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Whether a job is currently executing.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Spawn the coordinator loop and return a handle for control.
    ///
    /// Nothing is claimed until the gate opens.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let gate = self.gate.clone();
        let worker_id = self.worker_id.clone();

        let coordinator = Arc::new(self);
        let task = tokio::spawn(coordinator.run(shutdown_rx));

        WorkerHandle {
            shutdown_tx,
            event_rx,
            gate,
            worker_id,
            task,
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        tokio::select! {
            _ = self.gate.wait_active() => {}
            _ = shutdown_rx.recv() => {
                info!(
                    subsystem = "jobs",
                    component = "coordinator",
                    worker_id = %self.worker_id,
                    "Shut down before activation"
                );
                self.emit(WorkerEvent::WorkerStopped);
                return;
            }
        }

        info!(
            subsystem = "jobs",
            component = "coordinator",
            op = "start",
            worker_id = %self.worker_id,
            poll_interval_ms = self.config.poll_interval_ms,
            stable_identity = self.worker_id.is_stable(),
            "Job coordinator started"
        );
        self.emit(WorkerEvent::WorkerStarted {
            worker_id: self.worker_id.to_string(),
        });

        self.recover().await;

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(
                        subsystem = "jobs",
                        component = "coordinator",
                        worker_id = %self.worker_id,
                        "Job coordinator received shutdown signal"
                    );
                    break;
                }
                _ = ticker.tick() => {
                    if let Some(task) = self.poll_once().await {
                        // The slot was free, so the previous task is done.
                        if let Some(previous) = in_flight.replace(task) {
                            reap(previous).await;
                        }
                    }
                }
            }
        }

        if let Some(task) = in_flight {
            reap(task).await;
        }

        self.emit(WorkerEvent::WorkerStopped);
        info!(
            subsystem = "jobs",
            component = "coordinator",
            worker_id = %self.worker_id,
            "Job coordinator stopped"
        );
    }

    /// Revert rows left in `processing` by a previous run.
    ///
    /// Store failures are logged; polling starts regardless.
    async fn recover(&self) {
        let mut count = 0;

        match self.jobs.reset_orphans(&self.worker_id).await {
            Ok(jobs) => count += jobs.len(),
            Err(e) => error!(
                subsystem = "jobs",
                component = "coordinator",
                op = "reset_orphans",
                worker_id = %self.worker_id,
                error = %e,
                "Failed to recover orphaned jobs"
            ),
        }

        if let Some(after) = self.config.stale_after {
            match self.jobs.reset_stale(after).await {
                Ok(jobs) => count += jobs.len(),
                Err(e) => error!(
                    subsystem = "jobs",
                    component = "coordinator",
                    op = "reset_stale",
                    error = %e,
                    "Failed to recover stale jobs"
                ),
            }
        }

        if count > 0 {
            info!(
                subsystem = "jobs",
                component = "coordinator",
                op = "recover",
                worker_id = %self.worker_id,
                row_count = count,
                "Recovered jobs"
            );
        }
        self.emit(WorkerEvent::OrphansRecovered { count });
    }

    /// One tick: claim a job if the slot is free and spawn its execution.
    async fn poll_once(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                subsystem = "jobs",
                component = "coordinator",
                "Slot busy, skipping tick"
            );
            return None;
        }
        let slot = SlotGuard(self.busy.clone());

        let job = match self.jobs.claim_next(&self.worker_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return None,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "coordinator",
                    op = "claim",
                    retryable = e.is_retryable(),
                    error = %e,
                    "Failed to claim job"
                );
                return None;
            }
        };

        let this = self.clone();
        Some(tokio::spawn(async move {
            let _slot = slot;
            this.process(job).await;
        }))
    }

    /// Execute a claimed job and record its outcome.
    async fn process(&self, job: Job) {
        let start = Instant::now();
        info!(
            subsystem = "jobs",
            component = "coordinator",
            op = "execute",
            job_id = %job.job_id,
            job_type = %job.job_type,
            subject_id = %job.subject_id,
            worker_id = %self.worker_id,
            "Processing job"
        );
        self.emit(WorkerEvent::JobStarted {
            job_id: job.job_id.clone(),
            job_type: job.job_type.clone(),
        });

        let outcome = AssertUnwindSafe(self.handler.execute(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Error::Internal(format!(
                    "Job handler panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        match outcome {
            Ok(()) => self.record_success(&job, start).await,
            Err(err) => self.record_failure(&job, err, start).await,
        }
    }

    async fn record_success(&self, job: &Job, start: Instant) {
        if let Err(e) = self.jobs.mark_completed(job.id, &self.worker_id).await {
            error!(
                subsystem = "jobs",
                component = "coordinator",
                job_id = %job.job_id,
                error = %e,
                "Failed to mark job as completed"
            );
        }
        self.callbacks.on_success(&job.job_id);

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            subsystem = "jobs",
            component = "coordinator",
            job_id = %job.job_id,
            job_type = %job.job_type,
            duration_ms,
            "Job completed successfully"
        );
        self.emit(WorkerEvent::JobCompleted {
            job_id: job.job_id.clone(),
            job_type: job.job_type.clone(),
            duration_ms,
        });
    }

    async fn record_failure(&self, job: &Job, err: Error, start: Instant) {
        let message = err.to_string();
        warn!(
            subsystem = "jobs",
            component = "coordinator",
            job_id = %job.job_id,
            job_type = %job.job_type,
            error = %message,
            duration_ms = start.elapsed().as_millis() as u64,
            "Job failed"
        );

        if let Err(e) = self.jobs.mark_failed(job.id, &self.worker_id, &message).await {
            error!(
                subsystem = "jobs",
                component = "coordinator",
                job_id = %job.job_id,
                error = %e,
                "Failed to mark job as failed"
            );
        }

        self.callbacks.on_failure(&job.job_id, &err, &job.payload);

        self.emit(WorkerEvent::JobFailed {
            job_id: job.job_id.clone(),
            job_type: job.job_type.clone(),
            error: message,
        });
    }
}

/// Await a finished job task, logging if it did not complete normally.
async fn reap(task: JoinHandle<()>) {
    if let Err(e) = task.await {
        error!(
            subsystem = "jobs",
            component = "coordinator",
            error = %e,
            "Job task ended abnormally"
        );
    }
}

/// Builder for creating a job coordinator.
pub struct CoordinatorBuilder {
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    callbacks: ErrorCallbackRegistry,
    worker_id: Option<WorkerId>,
    gate: Option<ActivationGate>,
}

impl CoordinatorBuilder {
    pub fn new(jobs: Arc<dyn JobRepository>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            jobs,
            handler,
            config: WorkerConfig::default(),
            callbacks: ErrorCallbackRegistry::new(),
            worker_id: None,
            gate: None,
        }
    }

    /// Set the coordinator configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a callback registry with producers in this process.
    pub fn with_callbacks(mut self, callbacks: ErrorCallbackRegistry) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Override the identity derived from the config.
    pub fn with_worker_id(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_gate(mut self, gate: ActivationGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Build the coordinator. A designated config opens that half of the gate.
    pub fn build(self) -> JobCoordinator {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let worker_id = self.worker_id.unwrap_or_else(|| self.config.worker_id());
        let gate = self.gate.unwrap_or_default();
        if self.config.designated {
            gate.designate();
        }

        JobCoordinator {
            config: self.config,
            worker_id,
            jobs: self.jobs,
            handler: self.handler,
            callbacks: self.callbacks,
            gate,
            event_tx,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, 2000);
        assert!(!config.designated);
        assert!(config.slot.is_none());
        assert!(config.stale_after.is_none());
        assert!(!config.worker_id().is_stable());
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(50)
            .with_designated(true)
            .with_slot(3)
            .with_stale_after(Duration::from_secs(600));

        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert!(config.designated);
        assert_eq!(config.worker_id(), WorkerId::slot(3));
        assert_eq!(config.stale_after, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = WorkerConfig::default().with_poll_interval(0);
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_ephemeral_ids_differ_per_build() {
        let config = WorkerConfig::default();
        assert_ne!(config.worker_id(), config.worker_id());
    }

    #[test]
    fn test_slot_guard_releases() {
        let busy = Arc::new(AtomicBool::new(true));
        drop(SlotGuard(busy.clone()));
        assert!(!busy.load(Ordering::Acquire));
    }

    #[test]
    fn test_worker_event_clone_eq() {
        let event = WorkerEvent::JobFailed {
            job_id: "job-1".into(),
            job_type: "resize".into(),
            error: "boom".into(),
        };
        assert_eq!(event.clone(), event);
        assert!(format!("{event:?}").contains("JobFailed"));
    }
}
