//! Domain models for the transcoding job queue.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::defaults::{FORMAT_MAX_LEN, JOB_ID_MAX_LEN};
use crate::error::{Error, Result};

// =============================================================================
// JOB STATUS
// =============================================================================

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Database string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the job lifecycle allows moving from `self` to `next`.
    ///
    /// Legal: `pending -> processing`, `processing -> completed | failed`,
    /// and `processing -> pending` (orphan recovery). Terminal states never move.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Pending)
        )
    }

    /// Whether the job has been resolved.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Serialization(format!("unknown job status: {other}"))),
        }
    }
}

// =============================================================================
// JOB KIND
// =============================================================================

/// Job type string for resize jobs.
pub const JOB_TYPE_RESIZE: &str = "resize";
/// Job type string for container/format conversion jobs.
pub const JOB_TYPE_CHANGE_FORMAT: &str = "change-format";
/// Job type string for audio extraction jobs.
pub const JOB_TYPE_EXTRACT_AUDIO: &str = "extract-audio";

/// The operation a job performs, with its typed parameters.
///
/// Persisted as the job payload, tagged by `type` so stored rows keep the
/// wire names producers already use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobKind {
    /// Scale the video to `width`x`height`.
    Resize { width: u32, height: u32 },
    /// Re-encode into another container, e.g. `webm`.
    ChangeFormat { format: String },
    /// Extract the audio track as AAC.
    ExtractAudio,
}

impl JobKind {
    /// The `job_type` column value.
    pub fn job_type(&self) -> &'static str {
        match self {
            JobKind::Resize { .. } => JOB_TYPE_RESIZE,
            JobKind::ChangeFormat { .. } => JOB_TYPE_CHANGE_FORMAT,
            JobKind::ExtractAudio => JOB_TYPE_EXTRACT_AUDIO,
        }
    }

    /// The per-subject processing marker this job owns.
    pub fn processing_flag(&self) -> ProcessingFlag {
        match self {
            JobKind::Resize { width, height } => ProcessingFlag::Resize {
                width: *width,
                height: *height,
            },
            JobKind::ChangeFormat { format } => ProcessingFlag::Format(format.to_lowercase()),
            JobKind::ExtractAudio => ProcessingFlag::Audio,
        }
    }

    /// Reject parameters the executor cannot act on.
    pub fn validate(&self) -> Result<()> {
        match self {
            JobKind::Resize { width, height } => {
                if *width == 0 || *height == 0 {
                    return Err(Error::InvalidJob(format!(
                        "resize dimensions must be positive, got {width}x{height}"
                    )));
                }
            }
            JobKind::ChangeFormat { format } => {
                if format.is_empty()
                    || format.len() > FORMAT_MAX_LEN
                    || !format.chars().all(|c| c.is_ascii_alphanumeric())
                {
                    return Err(Error::InvalidJob(format!("invalid target format: {format:?}")));
                }
            }
            JobKind::ExtractAudio => {}
        }
        Ok(())
    }

    /// Parse a stored payload.
    ///
    /// A payload whose `type` is not a known kind yields
    /// [`Error::UnsupportedJobType`]; a known type with bad fields yields
    /// [`Error::Serialization`].
    pub fn from_payload(payload: &JsonValue) -> Result<Self> {
        let type_name = payload
            .get("type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::Serialization("job payload has no type".to_string()))?;

        match type_name {
            JOB_TYPE_RESIZE | JOB_TYPE_CHANGE_FORMAT | JOB_TYPE_EXTRACT_AUDIO => {
                Ok(serde_json::from_value(payload.clone())?)
            }
            other => Err(Error::UnsupportedJobType(other.to_string())),
        }
    }

    /// Serialize into the stored payload shape.
    pub fn to_payload(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Resize { width, height } => write!(f, "resize {width}x{height}"),
            JobKind::ChangeFormat { format } => write!(f, "change-format {format}"),
            JobKind::ExtractAudio => f.write_str("extract-audio"),
        }
    }
}

// =============================================================================
// JOB
// =============================================================================

/// A row in the `jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Store row id.
    pub id: i64,
    /// Caller-visible id assigned by the producer.
    pub job_id: String,
    pub job_type: String,
    pub subject_id: String,
    pub status: JobStatus,
    pub payload: JsonValue,
    /// Owning coordinator; set only while `processing`.
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Parse the payload into a typed kind.
    pub fn kind(&self) -> Result<JobKind> {
        JobKind::from_payload(&self.payload)
    }
}

/// Request to enqueue a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub job_id: String,
    pub subject_id: String,
    pub kind: JobKind,
}

impl NewJob {
    pub fn new(job_id: impl Into<String>, subject_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_id: job_id.into(),
            subject_id: subject_id.into(),
            kind,
        }
    }

    /// Validate identifiers and kind parameters.
    pub fn validate(&self) -> Result<()> {
        if self.job_id.is_empty() || self.job_id.len() > JOB_ID_MAX_LEN {
            return Err(Error::InvalidJob(format!(
                "job id must be 1..={JOB_ID_MAX_LEN} chars"
            )));
        }
        if self.subject_id.is_empty() {
            return Err(Error::InvalidJob("subject id is empty".to_string()));
        }
        self.kind.validate()
    }
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

// =============================================================================
// VIDEO (job subject)
// =============================================================================

/// In-flight marker stored per operation on a video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationState {
    pub processing: bool,
}

/// The subset of a video record the queue reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub video_id: String,
    pub name: String,
    /// Extension of the uploaded original, e.g. `mp4`.
    pub extension: String,
    pub extracted_audio: bool,
    pub audio_processing: bool,
    /// Keyed by `"{width}x{height}"`.
    pub resizes: HashMap<String, OperationState>,
    /// Keyed by lowercase format.
    pub formats: HashMap<String, OperationState>,
}

impl Video {
    /// Whether the given operation is currently marked in flight.
    pub fn is_processing(&self, flag: &ProcessingFlag) -> bool {
        match flag {
            ProcessingFlag::Resize { .. } => self
                .resizes
                .get(&flag.key())
                .map(|s| s.processing)
                .unwrap_or(false),
            ProcessingFlag::Format(format) => self
                .formats
                .get(format)
                .map(|s| s.processing)
                .unwrap_or(false),
            ProcessingFlag::Audio => self.audio_processing,
        }
    }
}

/// A per-subject, per-operation in-flight marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProcessingFlag {
    Resize { width: u32, height: u32 },
    Format(String),
    Audio,
}

impl ProcessingFlag {
    /// Map key under which the flag is stored.
    pub fn key(&self) -> String {
        match self {
            ProcessingFlag::Resize { width, height } => format!("{width}x{height}"),
            ProcessingFlag::Format(format) => format.clone(),
            ProcessingFlag::Audio => "audio".to_string(),
        }
    }
}
