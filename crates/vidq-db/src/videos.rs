//! Video repository: the subset of the media asset table the queue touches.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use vidq_core::{OperationState, ProcessingFlag, Result, Video, VideoRepository};

const VIDEO_COLUMNS: &str =
    "video_id, name, extension, extracted_audio, audio_processing, resizes, formats";

/// PostgreSQL implementation of VideoRepository.
#[derive(Clone)]
pub struct PgVideoRepository {
    pool: Pool<Postgres>,
}

impl PgVideoRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a video record. Uploading is owned elsewhere; this exists for
    /// fixtures and tooling.
    pub async fn insert(&self, video_id: &str, name: &str, extension: &str) -> Result<Video> {
        let row = sqlx::query(&format!(
            "INSERT INTO videos (video_id, name, extension)
             VALUES ($1, $2, $3)
             RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(video_id)
        .bind(name)
        .bind(extension)
        .fetch_one(&self.pool)
        .await?;

        Self::parse_video_row(row)
    }

    fn parse_video_row(row: PgRow) -> Result<Video> {
        Ok(Video {
            video_id: row.try_get("video_id")?,
            name: row.try_get("name")?,
            extension: row.try_get("extension")?,
            extracted_audio: row.try_get("extracted_audio")?,
            audio_processing: row.try_get("audio_processing")?,
            resizes: parse_state_map(row.try_get("resizes")?)?,
            formats: parse_state_map(row.try_get("formats")?)?,
        })
    }
}

/// Decode a `{key: {"processing": bool}}` JSONB map; `null` reads as empty.
fn parse_state_map(value: JsonValue) -> Result<HashMap<String, OperationState>> {
    if value.is_null() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_value(value)?)
}

/// JSONB fragment merged into `resizes`/`formats` for a flag update.
fn state_patch(flag: &ProcessingFlag, processing: bool) -> JsonValue {
    json!({ flag.key(): { "processing": processing } })
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    async fn get_video(&self, video_id: &str) -> Result<Option<Video>> {
        let row = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE video_id = $1"
        ))
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::parse_video_row).transpose()
    }

    async fn set_processing(
        &self,
        video_id: &str,
        flag: &ProcessingFlag,
        processing: bool,
    ) -> Result<()> {
        let query = match flag {
            ProcessingFlag::Resize { .. } => sqlx::query(
                "UPDATE videos
                 SET resizes = COALESCE(resizes, '{}'::jsonb) || $1::jsonb, updated_at = NOW()
                 WHERE video_id = $2",
            )
            .bind(state_patch(flag, processing))
            .bind(video_id),
            ProcessingFlag::Format(_) => sqlx::query(
                "UPDATE videos
                 SET formats = COALESCE(formats, '{}'::jsonb) || $1::jsonb, updated_at = NOW()
                 WHERE video_id = $2",
            )
            .bind(state_patch(flag, processing))
            .bind(video_id),
            ProcessingFlag::Audio => sqlx::query(
                "UPDATE videos SET audio_processing = $1, updated_at = NOW() WHERE video_id = $2",
            )
            .bind(processing)
            .bind(video_id),
        };

        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn mark_audio_extracted(&self, video_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE videos SET extracted_audio = TRUE, updated_at = NOW() WHERE video_id = $1",
        )
        .bind(video_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
