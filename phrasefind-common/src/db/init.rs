//! Database initialization
//!
//! Creates the SQLite database on first run, applies the schema, and seeds
//! default settings. All initializers are idempotent.

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use sqlite options to create database if it doesn't exist
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&db_url).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Open an in-memory database with the full schema. Test use only, but
/// lives here so every integration suite shares one schema source.
///
/// Pinned to a single pooled connection that never retires: every pool
/// connection would otherwise open its own empty `:memory:` database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // Writers back off for up to 5 seconds before reporting a lock
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(pool)
        .await?;

    // Table creation is idempotent - safe to call on every startup
    create_settings_table(pool).await?;
    create_segments_table(pool).await?;
    create_jobs_table(pool).await?;
    create_word_index_tables(pool).await?;
    create_analyses_table(pool).await?;
    create_quota_counters_table(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_segments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segments (
            fingerprint TEXT PRIMARY KEY,
            query TEXT NOT NULL,
            video_id TEXT NOT NULL,
            start_time REAL NOT NULL,
            end_time REAL NOT NULL,
            caption TEXT NOT NULL,
            captions TEXT NOT NULL,
            created_at TEXT NOT NULL,
            CHECK (end_time >= start_time)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_video_id ON segments(video_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL UNIQUE,
            query TEXT NOT NULL,
            canonical TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('word', 'sentence')),
            status TEXT NOT NULL DEFAULT 'queued'
                CHECK (status IN ('queued', 'searching', 'downloading', 'transcribing', 'completed', 'failed')),
            current_video_id TEXT,
            result TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_word_index_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS words (
            word TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Example rows are deduplicated per word on (video_id, start_time,
    // end_time) by the application inside a transaction; no unique index
    // on that tuple here.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS word_examples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            word TEXT NOT NULL REFERENCES words(word) ON DELETE CASCADE,
            video_id TEXT NOT NULL,
            start_time REAL NOT NULL,
            end_time REAL NOT NULL,
            caption TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_word_examples_word ON word_examples(word)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_analyses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            fingerprint TEXT PRIMARY KEY,
            sentence TEXT NOT NULL,
            target_word TEXT NOT NULL,
            target_language TEXT NOT NULL,
            native_language TEXT NOT NULL,
            context_before TEXT,
            context_after TEXT,
            full_translation TEXT NOT NULL,
            literal_translation TEXT NOT NULL,
            grammar_analysis TEXT NOT NULL,
            breakdown TEXT NOT NULL,
            idioms TEXT NOT NULL,
            difficulty_notes TEXT,
            chunk_log TEXT,
            access_count INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            last_accessed_at TEXT NOT NULL,
            CHECK (access_count >= 1)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_quota_counters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quota_counters (
            identity TEXT NOT NULL,
            scope TEXT NOT NULL,
            request_count INTEGER NOT NULL DEFAULT 0,
            window_start TEXT NOT NULL,
            PRIMARY KEY (identity, scope)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or repair default settings
///
/// Ensures all required settings exist with default values; NULL values are
/// reset to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Pipeline settings
    ensure_setting(pool, "max_concurrent_jobs", "5").await?;
    ensure_setting(pool, "job_poll_interval_ms", "2000").await?;
    ensure_setting(pool, "job_timeout_minutes", "15").await?;
    ensure_setting(pool, "search_results_per_strategy", "5").await?;
    ensure_setting(pool, "search_max_candidates", "10").await?;
    ensure_setting(pool, "transcribe_chunk_seconds", "30").await?;
    ensure_setting(pool, "transcribe_max_chunks", "10").await?;
    ensure_setting(pool, "segment_end_padding_seconds", "2").await?;

    // English gating thresholds (empirical; tune for heavy-proper-noun content)
    ensure_setting(pool, "english_min_function_words", "5").await?;
    ensure_setting(pool, "english_max_nonascii_ratio", "0.2").await?;

    // Streaming analysis settings
    ensure_setting(pool, "stream_capacity", "100").await?;

    // Quota settings
    ensure_setting(pool, "free_requests_per_window", "3").await?;
    ensure_setting(pool, "free_window_minutes", "240").await?;
    ensure_setting(pool, "subscription_cache_minutes", "5").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
        warn!(
            "Setting '{}' was NULL, reset to default: {}",
            key, default_value
        );
    }

    Ok(())
}

/// Read a setting value (None when missing or NULL)
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    Ok(value.flatten())
}
