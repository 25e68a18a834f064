//! ffmpeg-backed media executor.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use vidq_core::defaults::{FFMPEG_BIN, FFMPEG_THREADS, FFPROBE_BIN};
use vidq_core::{Error, MediaExecutor, Result};

/// Runs ffmpeg/ffprobe as child processes.
#[derive(Debug, Clone)]
pub struct FfmpegExecutor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    threads: u32,
    timeout: Option<Duration>,
}

impl Default for FfmpegExecutor {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from(FFMPEG_BIN),
            ffprobe: PathBuf::from(FFPROBE_BIN),
            threads: FFMPEG_THREADS,
            timeout: None,
        }
    }
}

impl FfmpegExecutor {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            ..Self::default()
        }
    }

    /// Create from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `FFMPEG_PATH` | `ffmpeg` | ffmpeg binary |
    /// | `FFPROBE_PATH` | `ffprobe` | ffprobe binary |
    pub fn from_env() -> Self {
        let ffmpeg = std::env::var("FFMPEG_PATH").unwrap_or_else(|_| FFMPEG_BIN.to_string());
        let ffprobe = std::env::var("FFPROBE_PATH").unwrap_or_else(|_| FFPROBE_BIN.to_string());
        Self::new(ffmpeg, ffprobe)
    }

    /// Abort commands that run longer than `timeout`. Unbounded by default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Trailing arguments shared by every encode.
    fn tail_args(&self, destination: &Path) -> Vec<OsString> {
        vec![
            "-threads".into(),
            self.threads.to_string().into(),
            "-y".into(),
            destination.into(),
        ]
    }

    fn resize_args(&self, source: &Path, destination: &Path, width: u32, height: u32) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            source.into(),
            "-vf".into(),
            format!("scale={width}:{height}").into(),
            "-c:v".into(),
            "libx264".into(),
            "-c:a".into(),
            "aac".into(),
            "-preset".into(),
            "medium".into(),
            "-crf".into(),
            "23".into(),
        ];
        args.extend(self.tail_args(destination));
        args
    }

    fn change_format_args(&self, source: &Path, destination: &Path, format: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), source.into()];
        let codec: &[&str] = match format.to_lowercase().as_str() {
            "webm" => &[
                "-c:v", "libvpx-vp9", "-c:a", "libopus", "-b:v", "1M", "-b:a", "128k", "-crf", "30",
            ],
            "mp4" | "mov" => &["-c:v", "libx264", "-c:a", "aac", "-preset", "medium", "-crf", "23"],
            _ => &["-c", "copy"],
        };
        args.extend(codec.iter().map(OsString::from));
        args.extend(self.tail_args(destination));
        args
    }

    fn extract_audio_args(&self, source: &Path, destination: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            source.into(),
            "-vn".into(),
            "-acodec".into(),
            "aac".into(),
            "-ab".into(),
            "128k".into(),
            "-ac".into(),
            "2".into(),
            "-ar".into(),
            "44100".into(),
            "-f".into(),
            "adts".into(),
        ];
        args.extend(self.tail_args(destination));
        args
    }

    /// Run ffmpeg to completion; a non-zero exit becomes an executor error
    /// carrying stderr.
    async fn run_ffmpeg(&self, op: &str, args: Vec<OsString>) -> Result<()> {
        let start = Instant::now();
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(&args).kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    Error::Executor(format!("{op} timed out after {}s", limit.as_secs()))
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| Error::Executor(format!("Failed to execute ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                subsystem = "jobs",
                component = "executor",
                op,
                exit = %output.status,
                duration_ms = start.elapsed().as_millis() as u64,
                "ffmpeg failed"
            );
            return Err(Error::Executor(format!("{op} failed: {}", stderr.trim())));
        }

        debug!(
            subsystem = "jobs",
            component = "executor",
            op,
            duration_ms = start.elapsed().as_millis() as u64,
            "ffmpeg finished"
        );
        Ok(())
    }
}

#[async_trait]
impl MediaExecutor for FfmpegExecutor {
    async fn resize(
        &self,
        source: &Path,
        destination: &Path,
        width: u32,
        height: u32,
    ) -> Result<PathBuf> {
        self.run_ffmpeg("resize", self.resize_args(source, destination, width, height))
            .await?;
        Ok(destination.to_path_buf())
    }

    async fn change_format(
        &self,
        source: &Path,
        destination: &Path,
        format: &str,
    ) -> Result<PathBuf> {
        self.run_ffmpeg(
            "change_format",
            self.change_format_args(source, destination, format),
        )
        .await?;
        Ok(destination.to_path_buf())
    }

    async fn extract_audio(&self, source: &Path, destination: &Path) -> Result<PathBuf> {
        self.run_ffmpeg("extract_audio", self.extract_audio_args(source, destination))
            .await?;
        Ok(destination.to_path_buf())
    }

    async fn has_audio_stream(&self, source: &Path) -> Result<bool> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-select_streams", "a"])
            .args(["-show_entries", "stream=codec_type", "-of", "csv=p=0"])
            .arg(source)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Executor(format!("Failed to execute ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(Error::Executor(format!(
                "ffprobe failed on {}: {}",
                source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .any(|line| line.trim() == "audio"))
    }
}
