//! Quota counters
//!
//! Fixed-width sliding windows per `(identity, scope)`. A window resets on
//! the first read past `window_start + window`; the count inside a live
//! window only grows.

use chrono::{DateTime, Duration, Utc};
use phrasefind_common::Result;
use sqlx::{Row, SqlitePool};

/// Counter state for one identity within its current window.
#[derive(Debug, Clone, Copy)]
pub struct WindowState {
    pub count: i64,
    pub window_start: DateTime<Utc>,
}

impl WindowState {
    /// Seconds until the window resets.
    pub fn retry_after_seconds(&self, window_minutes: i64) -> i64 {
        let reset_at = self.window_start + Duration::minutes(window_minutes);
        (reset_at - Utc::now()).num_seconds().max(0)
    }
}

/// Read the current window state, resetting it first if expired.
///
/// The returned count is a pre-increment read: callers check it against
/// their limit and call `increment` afterwards when the request is
/// allowed. Under concurrent requests from one identity the limiter is
/// therefore approximate, as designed.
pub async fn current_window(
    pool: &SqlitePool,
    identity: &str,
    scope: &str,
    window_minutes: i64,
) -> Result<WindowState> {
    let now = Utc::now();

    let row = sqlx::query(
        "SELECT request_count, window_start FROM quota_counters WHERE identity = ? AND scope = ?",
    )
    .bind(identity)
    .bind(scope)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(WindowState {
            count: 0,
            window_start: now,
        });
    };

    let count: i64 = row.get("request_count");
    let window_start_str: String = row.get("window_start");
    let window_start = phrasefind_common::db::parse_timestamp(&window_start_str);

    if now >= window_start + Duration::minutes(window_minutes) {
        // Window expired: reset on this first request past the boundary
        sqlx::query(
            "UPDATE quota_counters SET request_count = 0, window_start = ? WHERE identity = ? AND scope = ?",
        )
        .bind(now.to_rfc3339())
        .bind(identity)
        .bind(scope)
        .execute(pool)
        .await?;

        return Ok(WindowState {
            count: 0,
            window_start: now,
        });
    }

    Ok(WindowState {
        count,
        window_start,
    })
}

/// Count one allowed request against the identity's current window.
pub async fn increment(pool: &SqlitePool, identity: &str, scope: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO quota_counters (identity, scope, request_count, window_start)
        VALUES (?, ?, 1, ?)
        ON CONFLICT(identity, scope)
        DO UPDATE SET request_count = request_count + 1
        "#,
    )
    .bind(identity)
    .bind(scope)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}
