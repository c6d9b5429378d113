//! Analysis cache
//!
//! Persisted transcripts of completed sentence analyses, keyed by the
//! analysis fingerprint. The body is immutable; access accounting updates
//! `access_count` and `last_accessed_at`.

use chrono::Utc;
use phrasefind_common::db::{parse_timestamp, AnalysisRecord, BreakdownEntry, ChunkLogEntry, IdiomEntry};
use phrasefind_common::{Error, Result};
use sqlx::{Row, SqlitePool};

pub async fn find_by_fingerprint(
    pool: &SqlitePool,
    fingerprint: &str,
) -> Result<Option<AnalysisRecord>> {
    let row = sqlx::query("SELECT * FROM analyses WHERE fingerprint = ?")
        .bind(fingerprint)
        .fetch_optional(pool)
        .await?;

    row.map(row_to_analysis).transpose()
}

/// Insert a completed analysis.
///
/// Fails with `DuplicateKey` on fingerprint reuse; callers racing to
/// persist the same stream treat that as success.
pub async fn insert(pool: &SqlitePool, record: &AnalysisRecord) -> Result<()> {
    let breakdown_json = serde_json::to_string(&record.breakdown)
        .map_err(|e| Error::Internal(format!("Failed to serialize breakdown: {}", e)))?;
    let idioms_json = serde_json::to_string(&record.idioms)
        .map_err(|e| Error::Internal(format!("Failed to serialize idioms: {}", e)))?;
    let chunk_log_json = record
        .chunk_log
        .as_ref()
        .map(|log| serde_json::to_string(log))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize chunk log: {}", e)))?;

    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO analyses (
            fingerprint, sentence, target_word, target_language, native_language,
            context_before, context_after,
            full_translation, literal_translation, grammar_analysis,
            breakdown, idioms, difficulty_notes, chunk_log,
            access_count, created_at, last_accessed_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&record.fingerprint)
    .bind(&record.sentence)
    .bind(&record.target_word)
    .bind(&record.target_language)
    .bind(&record.native_language)
    .bind(&record.context_before)
    .bind(&record.context_after)
    .bind(&record.full_translation)
    .bind(&record.literal_translation)
    .bind(&record.grammar_analysis)
    .bind(&breakdown_json)
    .bind(&idioms_json)
    .bind(&record.difficulty_notes)
    .bind(&chunk_log_json)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if Error::is_unique_violation(&e) => Err(Error::DuplicateKey(format!(
            "analysis already cached for fingerprint {}",
            record.fingerprint
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Record one access: bumps the counter and returns the new value.
pub async fn touch_access(pool: &SqlitePool, fingerprint: &str) -> Result<i64> {
    sqlx::query(
        "UPDATE analyses SET access_count = access_count + 1, last_accessed_at = ? WHERE fingerprint = ?",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(fingerprint)
    .execute(pool)
    .await?;

    let count: i64 = sqlx::query_scalar("SELECT access_count FROM analyses WHERE fingerprint = ?")
        .bind(fingerprint)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

fn row_to_analysis(row: sqlx::sqlite::SqliteRow) -> Result<AnalysisRecord> {
    let breakdown_json: String = row.get("breakdown");
    let breakdown: Vec<BreakdownEntry> = serde_json::from_str(&breakdown_json)
        .map_err(|e| Error::Internal(format!("Malformed breakdown column: {}", e)))?;

    let idioms_json: String = row.get("idioms");
    let idioms: Vec<IdiomEntry> = serde_json::from_str(&idioms_json)
        .map_err(|e| Error::Internal(format!("Malformed idioms column: {}", e)))?;

    let chunk_log_json: Option<String> = row.get("chunk_log");
    let chunk_log: Option<Vec<ChunkLogEntry>> = chunk_log_json
        .map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| Error::Internal(format!("Malformed chunk log column: {}", e)))
        })
        .transpose()?;

    let created_at: String = row.get("created_at");
    let last_accessed_at: String = row.get("last_accessed_at");

    Ok(AnalysisRecord {
        fingerprint: row.get("fingerprint"),
        sentence: row.get("sentence"),
        target_word: row.get("target_word"),
        target_language: row.get("target_language"),
        native_language: row.get("native_language"),
        context_before: row.get("context_before"),
        context_after: row.get("context_after"),
        full_translation: row.get("full_translation"),
        literal_translation: row.get("literal_translation"),
        grammar_analysis: row.get("grammar_analysis"),
        breakdown,
        idioms,
        difficulty_notes: row.get("difficulty_notes"),
        chunk_log,
        access_count: row.get("access_count"),
        created_at: parse_timestamp(&created_at),
        last_accessed_at: parse_timestamp(&last_accessed_at),
    })
}
