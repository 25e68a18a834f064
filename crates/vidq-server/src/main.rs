//! vidq - transcoding job queue worker and fleet manager.
//!
//! ```bash
//! # One worker per CPU, child 0 processes jobs
//! vidq fleet
//!
//! # Enqueue a resize and check on it
//! vidq enqueue --job-id job-1 --video v1 resize --width 640 --height 360
//! vidq status job-1
//! ```

mod config;
mod fleet;
mod telemetry;
mod worker;

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use vidq_db::Database;
use vidq_jobs::{ErrorCallbackRegistry, JobKind, JobProducer, JobRepository, NewJob};

use crate::config::ServerConfig;
use crate::fleet::FleetConfig;
use crate::telemetry::LogConfig;

#[derive(Parser)]
#[command(name = "vidq")]
#[command(author, version, about = "PostgreSQL-backed video transcoding queue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one worker process per CPU; the first is the job processor
    Fleet {
        /// Number of worker processes (default: available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Give each worker a stable identity so it recovers its own orphans
        #[arg(long)]
        stable_slots: bool,

        /// Seconds a worker may take to exit before it is killed
        #[arg(long, default_value_t = 10)]
        grace_secs: u64,
    },

    /// Run a single worker process
    Worker,

    /// Enqueue a transcoding job
    Enqueue {
        /// Caller-visible job id
        #[arg(long)]
        job_id: String,

        /// Video to operate on
        #[arg(long)]
        video: String,

        #[command(subcommand)]
        operation: Operation,
    },

    /// Show a job's stored status
    Status {
        /// Caller-visible job id
        job_id: String,
    },

    /// Show queue counts by status
    Stats,

    /// Apply database migrations and exit
    Migrate,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Operation {
    /// Scale to WIDTHxHEIGHT
    Resize {
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
    },

    /// Re-encode into another container
    ChangeFormat {
        /// Target format, e.g. webm
        #[arg(short, long)]
        format: String,
    },

    /// Extract the audio track as AAC
    ExtractAudio,
}

impl From<Operation> for JobKind {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Resize { width, height } => JobKind::Resize { width, height },
            Operation::ChangeFormat { format } => JobKind::ChangeFormat { format },
            Operation::ExtractAudio => JobKind::ExtractAudio,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = telemetry::init(&LogConfig::from_env());

    let result = match cli.command {
        Commands::Fleet {
            workers,
            stable_slots,
            grace_secs,
        } => {
            let mut config = FleetConfig::default()
                .with_stable_slots(stable_slots)
                .with_grace(Duration::from_secs(grace_secs));
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }
            fleet::run(config).await
        }
        Commands::Worker => worker::run(ServerConfig::from_env()).await,
        Commands::Enqueue {
            job_id,
            video,
            operation,
        } => enqueue(NewJob::new(job_id, video, operation.into())).await,
        Commands::Status { job_id } => status(&job_id).await,
        Commands::Stats => stats().await,
        Commands::Migrate => migrate().await,
    };

    if let Err(ref e) = result {
        error!(error = %format!("{e:#}"), "vidq exited with error");
    }
    result
}

async fn connect() -> anyhow::Result<Database> {
    let config = ServerConfig::from_env();
    Database::connect_with_config(&config.database_url, config.pool)
        .await
        .context("failed to connect to database")
}

async fn enqueue(job: NewJob) -> anyhow::Result<()> {
    let db = connect().await?;
    let producer = JobProducer::new(
        db.job_repository(),
        db.video_repository(),
        ErrorCallbackRegistry::new(),
    );
    let job = producer.enqueue(job).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn status(job_id: &str) -> anyhow::Result<()> {
    let db = connect().await?;
    let job = db
        .job_repository()
        .get(job_id)
        .await?
        .with_context(|| format!("job {job_id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn stats() -> anyhow::Result<()> {
    let db = connect().await?;
    let stats = db.job_repository().queue_stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn migrate() -> anyhow::Result<()> {
    let db = connect().await?;
    db.migrate().await.context("failed to run migrations")?;
    info!("Migrations applied");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
