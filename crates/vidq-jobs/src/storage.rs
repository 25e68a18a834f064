//! On-disk layout of video artifacts.
//!
//! ```text
//! {base}/{video_id}/original.{ext}
//! {base}/{video_id}/{width}x{height}.{ext}
//! {base}/{video_id}/format_{fmt}.{fmt}
//! {base}/{video_id}/audio.aac
//! ```

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use vidq_core::defaults::STORAGE_PATH;

/// Resolves artifact paths under a storage root.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base: PathBuf,
}

impl StorageLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Read the storage root from `STORAGE_PATH` (default `./storage`).
    pub fn from_env() -> Self {
        let base = std::env::var("STORAGE_PATH").unwrap_or_else(|_| STORAGE_PATH.to_string());
        Self::new(base)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Folder holding every artifact of one video.
    pub fn video_dir(&self, video_id: &str) -> PathBuf {
        self.base.join(video_id)
    }

    pub fn file_path(&self, video_id: &str, filename: &str) -> PathBuf {
        self.video_dir(video_id).join(filename)
    }

    /// The uploaded source file.
    pub fn original(&self, video_id: &str, extension: &str) -> PathBuf {
        self.file_path(video_id, &format!("original.{extension}"))
    }

    /// Output of a resize; keeps the source extension.
    pub fn resized(&self, video_id: &str, width: u32, height: u32, extension: &str) -> PathBuf {
        self.file_path(video_id, &format!("{width}x{height}.{extension}"))
    }

    pub fn converted(&self, video_id: &str, format: &str) -> PathBuf {
        self.file_path(video_id, &format!("format_{format}.{format}"))
    }

    pub fn audio(&self, video_id: &str) -> PathBuf {
        self.file_path(video_id, "audio.aac")
    }

    /// Delete a (possibly partial) artifact. A missing file counts as removed.
    pub async fn remove_artifact(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(
                    subsystem = "jobs",
                    component = "storage",
                    op = "remove_artifact",
                    path = %path.display(),
                    "Removed artifact"
                );
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(STORAGE_PATH)
    }
}
