//! # vidq-jobs
//!
//! Transcoding job processing for vidq.
//!
//! This crate provides:
//! - A single-slot job coordinator gated on fleet designation and store readiness
//! - Media job handlers backed by ffmpeg
//! - One-shot in-process error callbacks
//! - Lifecycle notifications via broadcast channels
//! - The producer API used to enqueue work
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vidq_db::Database;
//! use vidq_jobs::{
//!     CoordinatorBuilder, ErrorCallbackRegistry, FfmpegExecutor, MediaJobHandler,
//!     StorageLayout, WorkerConfig,
//! };
//!
//! let db = Database::connect("postgres://...").await?;
//! let handler = MediaJobHandler::new(
//!     db.video_repository(),
//!     Arc::new(FfmpegExecutor::from_env()),
//!     StorageLayout::from_env(),
//! );
//!
//! let handle = CoordinatorBuilder::new(db.job_repository(), Arc::new(handler))
//!     .with_config(WorkerConfig::from_env())
//!     .with_callbacks(ErrorCallbackRegistry::new())
//!     .build()
//!     .start();
//!
//! db.migrate().await?;
//! handle.gate().mark_store_ready();
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod callbacks;
pub mod executor;
pub mod gate;
pub mod handler;
pub mod producer;
pub mod storage;
pub mod worker;

// Re-export core types
pub use vidq_core::*;

pub use callbacks::{ErrorCallback, ErrorCallbackRegistry};
pub use executor::FfmpegExecutor;
pub use gate::ActivationGate;
pub use handler::{JobHandler, MediaJobHandler};
pub use producer::JobProducer;
pub use storage::StorageLayout;
pub use worker::{CoordinatorBuilder, JobCoordinator, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = vidq_core::defaults::JOB_POLL_INTERVAL_MS;
