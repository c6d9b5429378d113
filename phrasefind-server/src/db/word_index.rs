//! Word index
//!
//! Reverse index from words to the segments they occur in. Append-only at
//! the granularity of a `(word, video_id, start, end)` tuple; the
//! deduplication is enforced by the application inside a transaction, not
//! by a store-level unique constraint.

use chrono::Utc;
use phrasefind_common::db::{parse_timestamp, retry_on_lock, SegmentRef, WordEntry};
use phrasefind_common::Result;
use sqlx::{Row, SqlitePool};

/// Maximum time spent retrying the index transaction on lock contention.
const INDEX_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Word-index totals for `/stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordIndexStats {
    pub total_words: i64,
    pub total_mappings: i64,
}

/// Add a segment reference under each of `words`.
///
/// One transaction covers the whole batch: for every word the entry is
/// upserted and the reference appended iff no existing example shares
/// `(video_id, start_time, end_time)`. Repeating the call with the same
/// segment is a no-op.
pub async fn add_segment_to_words(
    pool: &SqlitePool,
    words: &[String],
    segment: &SegmentRef,
) -> Result<()> {
    retry_on_lock("word index update", INDEX_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        for word in words {
            sqlx::query(
                r#"
                INSERT INTO words (word, created_at, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(word) DO UPDATE SET updated_at = excluded.updated_at
                "#,
            )
            .bind(word)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            let exists: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM word_examples
                    WHERE word = ? AND video_id = ? AND start_time = ? AND end_time = ?
                )
                "#,
            )
            .bind(word)
            .bind(&segment.video_id)
            .bind(segment.start_time)
            .bind(segment.end_time)
            .fetch_one(&mut *tx)
            .await?;

            if !exists {
                sqlx::query(
                    r#"
                    INSERT INTO word_examples (word, video_id, start_time, end_time, caption, created_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(word)
                .bind(&segment.video_id)
                .bind(segment.start_time)
                .bind(segment.end_time)
                .bind(&segment.caption)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    })
    .await
}

/// Entry for one word with examples in insertion order, or None.
pub async fn find_by_word(pool: &SqlitePool, word: &str) -> Result<Option<WordEntry>> {
    let word_row = sqlx::query("SELECT word, created_at, updated_at FROM words WHERE word = ?")
        .bind(word)
        .fetch_optional(pool)
        .await?;

    let Some(word_row) = word_row else {
        return Ok(None);
    };

    let example_rows = sqlx::query(
        r#"
        SELECT video_id, start_time, end_time, caption
        FROM word_examples
        WHERE word = ?
        ORDER BY id
        "#,
    )
    .bind(word)
    .fetch_all(pool)
    .await?;

    let examples = example_rows
        .into_iter()
        .map(|row| SegmentRef {
            video_id: row.get("video_id"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            caption: row.get("caption"),
        })
        .collect();

    let created_at: String = word_row.get("created_at");
    let updated_at: String = word_row.get("updated_at");

    Ok(Some(WordEntry {
        word: word_row.get("word"),
        examples,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    }))
}

/// Alphabetical page of indexed words.
pub async fn list_words(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<String>> {
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT word FROM words ORDER BY word LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn stats(pool: &SqlitePool) -> Result<WordIndexStats> {
    let total_words: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM words")
        .fetch_one(pool)
        .await?;
    let total_mappings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM word_examples")
        .fetch_one(pool)
        .await?;

    Ok(WordIndexStats {
        total_words,
        total_mappings,
    })
}
