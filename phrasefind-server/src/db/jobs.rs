//! Job store
//!
//! Persistent queue of search jobs with per-job status, progress, and
//! terminal result/error. Exactly one row exists per fingerprint; status
//! progresses monotonically and terminal states never regress (the
//! terminalizing updates carry an explicit status guard).

use chrono::Utc;
use phrasefind_common::db::{parse_timestamp, JobRecord, JobStatus, SegmentRecord};
use phrasefind_common::query::QueryKind;
use phrasefind_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Fields needed to enqueue a new job.
#[derive(Debug, Clone)]
pub struct JobInit {
    pub fingerprint: String,
    pub query: String,
    pub canonical: String,
    pub kind: QueryKind,
}

/// Create a job in `queued` state.
///
/// Fails with `DuplicateKey` when a job already exists for the
/// fingerprint; callers resolve by fetching the existing job.
pub async fn create(pool: &SqlitePool, init: &JobInit) -> Result<JobRecord> {
    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO jobs (id, fingerprint, query, canonical, kind, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'queued', ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&init.fingerprint)
    .bind(&init.query)
    .bind(&init.canonical)
    .bind(init.kind.as_str())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await;

    match result {
        Ok(_) => find_by_id(pool, id)
            .await?
            .ok_or_else(|| Error::Internal("job vanished after insert".to_string())),
        Err(e) if Error::is_unique_violation(&e) => Err(Error::DuplicateKey(format!(
            "job already exists for fingerprint {}",
            init.fingerprint
        ))),
        Err(e) => Err(e.into()),
    }
}

pub async fn find_by_fingerprint(pool: &SqlitePool, fingerprint: &str) -> Result<Option<JobRecord>> {
    let row = sqlx::query("SELECT * FROM jobs WHERE fingerprint = ?")
        .bind(fingerprint)
        .fetch_optional(pool)
        .await?;

    row.map(row_to_job).transpose()
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<JobRecord>> {
    let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(row_to_job).transpose()
}

/// Advance a job to a non-terminal phase, optionally recording the video
/// currently being processed. No-op once the job is terminal.
pub async fn set_status(
    pool: &SqlitePool,
    fingerprint: &str,
    status: JobStatus,
    current_video_id: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = ?, current_video_id = ?, updated_at = ?
        WHERE fingerprint = ? AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(status.as_str())
    .bind(current_video_id)
    .bind(Utc::now().to_rfc3339())
    .bind(fingerprint)
    .execute(pool)
    .await?;

    Ok(())
}

/// Terminalize a job as `completed` with its segment.
pub async fn set_result(pool: &SqlitePool, fingerprint: &str, segment: &SegmentRecord) -> Result<()> {
    let result_json = serde_json::to_string(segment)
        .map_err(|e| Error::Internal(format!("Failed to serialize job result: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'completed', result = ?, current_video_id = NULL, updated_at = ?
        WHERE fingerprint = ? AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(&result_json)
    .bind(Utc::now().to_rfc3339())
    .bind(fingerprint)
    .execute(pool)
    .await?;

    Ok(())
}

/// Terminalize a job as `failed` with a human-readable message.
pub async fn set_error(pool: &SqlitePool, fingerprint: &str, message: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'failed', error = ?, current_video_id = NULL, updated_at = ?
        WHERE fingerprint = ? AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(fingerprint)
    .execute(pool)
    .await?;

    Ok(())
}

/// All queued jobs, FIFO by creation time.
pub async fn list_queued(pool: &SqlitePool) -> Result<Vec<JobRecord>> {
    let rows = sqlx::query("SELECT * FROM jobs WHERE status = 'queued' ORDER BY created_at, id")
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(row_to_job).collect()
}

/// Count of jobs not yet terminal; exposed through `/stats`.
pub async fn count_pending(pool: &SqlitePool) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status NOT IN ('completed', 'failed')")
            .fetch_one(pool)
            .await?;
    Ok(count)
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<JobRecord> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| Error::Internal(format!("Malformed job id column: {}", e)))?;

    let kind_str: String = row.get("kind");
    let kind = QueryKind::parse(&kind_str)
        .ok_or_else(|| Error::Internal(format!("Unknown job kind: {}", kind_str)))?;

    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("Unknown job status: {}", status_str)))?;

    let result_json: Option<String> = row.get("result");
    let result = result_json
        .map(|json| {
            serde_json::from_str::<SegmentRecord>(&json)
                .map_err(|e| Error::Internal(format!("Malformed job result column: {}", e)))
        })
        .transpose()?;

    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(JobRecord {
        id,
        fingerprint: row.get("fingerprint"),
        query: row.get("query"),
        canonical: row.get("canonical"),
        kind,
        status,
        current_video_id: row.get("current_video_id"),
        result,
        error: row.get("error"),
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use phrasefind_common::db::init_memory_database;

    fn init(fp: &str) -> JobInit {
        JobInit {
            fingerprint: fp.to_string(),
            query: "Hello".to_string(),
            canonical: "hello".to_string(),
            kind: QueryKind::Word,
        }
    }

    #[tokio::test]
    async fn test_create_starts_queued() {
        let pool = init_memory_database().await.unwrap();
        let job = create(&pool, &init("fp1")).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.canonical, "hello");
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let pool = init_memory_database().await.unwrap();
        create(&pool, &init("fp1")).await.unwrap();

        let err = create(&pool, &init("fp1")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));

        // Resolution path: fetch the existing job
        let existing = find_by_fingerprint(&pool, "fp1").await.unwrap();
        assert!(existing.is_some());
    }

    #[tokio::test]
    async fn test_status_progression_and_terminal_guard() {
        let pool = init_memory_database().await.unwrap();
        create(&pool, &init("fp1")).await.unwrap();

        set_status(&pool, "fp1", JobStatus::Searching, None).await.unwrap();
        set_status(&pool, "fp1", JobStatus::Downloading, Some("v9")).await.unwrap();

        let job = find_by_fingerprint(&pool, "fp1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.current_video_id.as_deref(), Some("v9"));

        set_error(&pool, "fp1", "No videos found for this query").await.unwrap();

        // Terminal state never regresses
        set_status(&pool, "fp1", JobStatus::Searching, None).await.unwrap();
        let job = find_by_fingerprint(&pool, "fp1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("No videos found for this query"));
    }

    #[tokio::test]
    async fn test_list_queued_fifo() {
        let pool = init_memory_database().await.unwrap();
        create(&pool, &init("fp1")).await.unwrap();
        create(&pool, &init("fp2")).await.unwrap();
        set_status(&pool, "fp1", JobStatus::Searching, None).await.unwrap();

        let queued = list_queued(&pool).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].fingerprint, "fp2");
    }
}
