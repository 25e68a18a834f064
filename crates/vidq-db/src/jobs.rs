//! Job repository implementation.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};

use vidq_core::{Error, Job, JobRepository, JobStatus, NewJob, QueueStats, Result, WorkerId};

const JOB_COLUMNS: &str = "id, job_id, job_type, subject_id, status, payload, worker_id, \
     error_message, created_at, updated_at, started_at, completed_at";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: PgRow) -> Result<Job> {
        let status: String = row.try_get("status")?;
        Ok(Job {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            job_type: row.try_get("job_type")?,
            subject_id: row.try_get("subject_id")?,
            status: status.parse()?,
            payload: row.try_get("payload")?,
            worker_id: row.try_get("worker_id")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn parse_rows(rows: Vec<PgRow>) -> Result<Vec<Job>> {
        rows.into_iter().map(Self::parse_job_row).collect()
    }

    /// Move a `processing` row held by `worker` to a terminal status.
    ///
    /// The status and owner guards make the update a no-op for rows in any
    /// other state or reclaimed by someone else; both are reported as errors.
    async fn resolve(
        &self,
        row_id: i64,
        worker: &WorkerId,
        to: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs
             SET status = $1, worker_id = NULL, error_message = $2,
                 completed_at = NOW(), updated_at = NOW()
             WHERE id = $3 AND status = 'processing' AND worker_id = $4",
        )
        .bind(to.as_str())
        .bind(error)
        .bind(row_id)
        .bind(worker.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(row_id)
            .fetch_optional(&self.pool)
            .await?;

        match current {
            None => Err(Error::NotFound(format!("job row {row_id}"))),
            Some(status) => {
                let from: JobStatus = status.parse()?;
                if from == JobStatus::Processing {
                    Err(Error::NotOwner {
                        row_id,
                        worker_id: worker.to_string(),
                    })
                } else {
                    Err(Error::InvalidTransition { row_id, from, to })
                }
            }
        }
    }
}

/// Map a unique-constraint violation on `job_id` to a domain error.
fn map_insert_error(job_id: &str, e: sqlx::Error) -> Error {
    match e.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => Error::DuplicateJob(job_id.to_string()),
        _ => Error::Database(e),
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: &NewJob) -> Result<Job> {
        let payload = job.kind.to_payload()?;

        let row = sqlx::query(&format!(
            "INSERT INTO jobs (job_id, job_type, subject_id, status, payload)
             VALUES ($1, $2, $3, 'pending', $4)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(&job.job_id)
        .bind(job.kind.job_type())
        .bind(&job.subject_id)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(&job.job_id, e))?;

        Self::parse_job_row(row)
    }

    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<Job>> {
        // FOR UPDATE SKIP LOCKED: concurrent claimants pass over a row another
        // transaction holds instead of blocking on it, so each row goes to
        // exactly one claimant.
        let row = sqlx::query(&format!(
            "UPDATE jobs
             SET status = 'processing', worker_id = $1, started_at = NOW(), updated_at = NOW()
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status = 'pending'
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(worker.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn mark_completed(&self, row_id: i64, worker: &WorkerId) -> Result<()> {
        self.resolve(row_id, worker, JobStatus::Completed, None).await
    }

    async fn mark_failed(&self, row_id: i64, worker: &WorkerId, error: &str) -> Result<()> {
        self.resolve(row_id, worker, JobStatus::Failed, Some(error)).await
    }

    async fn reset_orphans(&self, worker: &WorkerId) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "UPDATE jobs
             SET status = 'pending', worker_id = NULL, started_at = NULL, updated_at = NOW()
             WHERE worker_id = $1 AND status = 'processing'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(worker.as_str())
        .fetch_all(&self.pool)
        .await?;

        let jobs = Self::parse_rows(rows)?;
        debug!(
            subsystem = "db",
            component = "jobs",
            op = "reset_orphans",
            worker_id = %worker,
            row_count = jobs.len(),
            "Orphan reset finished"
        );
        Ok(jobs)
    }

    async fn reset_stale(&self, older_than: Duration) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "UPDATE jobs
             SET status = 'pending', worker_id = NULL, started_at = NULL, updated_at = NOW()
             WHERE status = 'processing'
               AND updated_at < NOW() - ($1 * INTERVAL '1 second')
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(older_than.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        let jobs = Self::parse_rows(rows)?;
        if !jobs.is_empty() {
            info!(
                subsystem = "db",
                component = "jobs",
                op = "reset_stale",
                older_than_secs = older_than.as_secs(),
                row_count = jobs.len(),
                "Reverted stale processing jobs"
            );
        }
        Ok(jobs)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
             FROM jobs",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.try_get("pending")?,
            processing: row.try_get("processing")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
        })
    }
}
