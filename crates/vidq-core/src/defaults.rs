//! Centralized default constants for vidq.
//!
//! Crates reference these instead of defining their own magic numbers.

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Interval between poll ticks of the active coordinator (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 2_000;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Maximum length of a caller-visible job id.
pub const JOB_ID_MAX_LEN: usize = 64;

/// Maximum length of a target container format / extension.
pub const FORMAT_MAX_LEN: usize = 10;

// =============================================================================
// DATABASE
// =============================================================================

/// Maximum pooled connections per worker process.
pub const DB_MAX_CONNECTIONS: u32 = 20;

/// Seconds to wait for a pooled connection.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 2;

/// Seconds before an idle pooled connection is closed.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// MEDIA
// =============================================================================

/// Default ffmpeg binary.
pub const FFMPEG_BIN: &str = "ffmpeg";

/// Default ffprobe binary.
pub const FFPROBE_BIN: &str = "ffprobe";

/// Threads handed to each ffmpeg invocation.
pub const FFMPEG_THREADS: u32 = 2;

/// Default root directory for per-video storage folders.
pub const STORAGE_PATH: &str = "./storage";
