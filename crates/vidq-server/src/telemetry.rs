//! Tracing subscriber setup.
//!
//! Environment variables:
//!   LOG_FORMAT  - "json" or "text" (default: "text")
//!   LOG_FILE    - path to log file (optional, enables file logging)
//!   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
//!   RUST_LOG    - standard env filter (default: "vidq=info")

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "vidq=info,vidq_server=info,vidq_jobs=info,vidq_db=info";

/// Logging options read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub json: bool,
    pub file: Option<String>,
    pub ansi: Option<bool>,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            file: std::env::var("LOG_FILE").ok().filter(|v| !v.is_empty()),
            ansi: std::env::var("LOG_ANSI")
                .ok()
                .map(|v| v == "true" || v == "1"),
        }
    }
}

/// Split a log path into the directory and file prefix used for daily rotation.
fn rolling_target(path: &str) -> (&Path, &str) {
    let path = Path::new(path);
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("vidq.log");
    (dir, name)
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process so buffered file output is flushed.
pub fn init(config: &LogConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = config.file {
        let (dir, name) = rolling_target(path);
        let file_appender = tracing_appender::rolling::daily(dir, name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if config.json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(config.ansi.unwrap_or(false)); // no ANSI in files
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if config.json {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = config.ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}
