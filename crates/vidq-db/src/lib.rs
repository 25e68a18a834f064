//! # vidq-db
//!
//! PostgreSQL job store for vidq.
//!
//! This crate provides:
//! - Connection pool management
//! - The durable job queue (`PgJobRepository`) with `SKIP LOCKED` claims
//! - The video repository used to read subjects and toggle processing flags
//! - Embedded schema migrations
//!
//! ## Example
//!
//! ```rust,ignore
//! use vidq_db::{Database, JobKind, JobRepository, NewJob};
//!
//! let db = Database::connect("postgres://localhost/vidq").await?;
//! db.migrate().await?;
//!
//! let job = db
//!     .jobs
//!     .insert(&NewJob::new("job-1", "ab12cd34", JobKind::ExtractAudio))
//!     .await?;
//! println!("queued row {}", job.id);
//! ```

use std::sync::Arc;

pub mod jobs;
pub mod pool;
pub mod test_fixtures;
pub mod videos;

// Re-export core types
pub use vidq_core::*;

pub use jobs::PgJobRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use videos::PgVideoRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Durable job queue.
    pub jobs: PgJobRepository,
    /// Media asset access.
    pub videos: PgVideoRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobRepository::new(pool.clone()),
            videos: PgVideoRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Whether the queue table exists, for processes that do not run migrations.
    pub async fn schema_ready(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass('public.jobs') IS NOT NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    /// The job queue as a trait object for the coordinator.
    pub fn job_repository(&self) -> Arc<dyn JobRepository> {
        Arc::new(self.jobs.clone())
    }

    /// The video repository as a trait object for job handlers.
    pub fn video_repository(&self) -> Arc<dyn VideoRepository> {
        Arc::new(self.videos.clone())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
