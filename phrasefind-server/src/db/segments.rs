//! Segment result store
//!
//! Durable cache of completed search results keyed by fingerprint. Records
//! are immutable after insert and never evicted.

use chrono::Utc;
use phrasefind_common::db::{parse_timestamp, CaptionSpan, SegmentRecord};
use phrasefind_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Look up a cached segment by fingerprint.
pub async fn find_by_fingerprint(pool: &SqlitePool, fingerprint: &str) -> Result<Option<SegmentRecord>> {
    let row = sqlx::query(
        r#"
        SELECT fingerprint, query, video_id, start_time, end_time, caption, captions, created_at
        FROM segments
        WHERE fingerprint = ?
        "#,
    )
    .bind(fingerprint)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_segment).transpose()
}

/// Insert a completed segment.
///
/// Fails with `DuplicateKey` when a record already exists for the
/// fingerprint; the pipeline treats that as success (the earlier result
/// wins and is never mutated).
pub async fn insert(pool: &SqlitePool, segment: &SegmentRecord) -> Result<()> {
    let captions_json = serde_json::to_string(&segment.captions)
        .map_err(|e| Error::Internal(format!("Failed to serialize captions: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO segments (fingerprint, query, video_id, start_time, end_time, caption, captions, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&segment.fingerprint)
    .bind(&segment.query)
    .bind(&segment.video_id)
    .bind(segment.start_time)
    .bind(segment.end_time)
    .bind(&segment.caption)
    .bind(&captions_json)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if Error::is_unique_violation(&e) => Err(Error::DuplicateKey(format!(
            "segment already cached for fingerprint {}",
            segment.fingerprint
        ))),
        Err(e) => Err(e.into()),
    }
}

fn row_to_segment(row: sqlx::sqlite::SqliteRow) -> Result<SegmentRecord> {
    let captions_json: String = row.get("captions");
    let captions: Vec<CaptionSpan> = serde_json::from_str(&captions_json)
        .map_err(|e| Error::Internal(format!("Malformed captions column: {}", e)))?;
    let created_at: String = row.get("created_at");

    Ok(SegmentRecord {
        fingerprint: row.get("fingerprint"),
        query: row.get("query"),
        video_id: row.get("video_id"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        caption: row.get("caption"),
        captions,
        created_at: parse_timestamp(&created_at),
    })
}
