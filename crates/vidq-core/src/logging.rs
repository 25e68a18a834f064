//! Structured logging field name constants for vidq.
//!
//! All crates use these names so log aggregation can query the same fields
//! across the worker, the fleet manager and the database layer.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Job failures, best-effort cleanup that did not succeed |
//! | INFO  | Lifecycle events (startup, designation, recovery), job completions |
//! | DEBUG | Empty polls, skipped ticks, config choices |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "jobs", "fleet"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "coordinator", "executor", "registry"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_next", "reset_orphans", "resize"
pub const OPERATION: &str = "op";

/// Identity of the coordinator process.
pub const WORKER_ID: &str = "worker_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Caller-visible job id.
pub const JOB_ID: &str = "job_id";

/// Job type string (`resize`, `change-format`, `extract-audio`).
pub const JOB_TYPE: &str = "job_type";

/// Media asset the job operates on.
pub const SUBJECT_ID: &str = "subject_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows touched by a bulk operation.
pub const ROW_COUNT: &str = "row_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
