//! Word index endpoints

use super::responses::ApiError;
use crate::db::{jobs, word_index};
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use phrasefind_common::db::SegmentRef;
use phrasefind_common::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

const MAX_PAGE_SIZE: i64 = 500;

/// `GET /examples/:word` — the raw example list.
pub async fn examples(
    State(state): State<Arc<AppState>>,
    Path(word): Path<String>,
) -> Result<Json<Vec<SegmentRef>>, ApiError> {
    let entry = word_index::find_by_word(&state.db, &word.to_lowercase())
        .await?
        .ok_or_else(|| Error::NotFound(format!("no examples for word '{}'", word)))?;

    Ok(Json(entry.examples))
}

/// `GET /word/:word` — entry with count.
pub async fn word_detail(
    State(state): State<Arc<AppState>>,
    Path(word): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let entry = word_index::find_by_word(&state.db, &word.to_lowercase())
        .await?
        .ok_or_else(|| Error::NotFound(format!("no entry for word '{}'", word)))?;

    Ok(Json(json!({
        "word": entry.word,
        "examples": entry.examples,
        "count": entry.examples.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct WordsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct WordsPage {
    pub words: Vec<String>,
    pub count: usize,
    pub limit: i64,
    pub offset: i64,
}

/// `GET /words?limit&offset` — alphabetical page of indexed words.
pub async fn list_words(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WordsQuery>,
) -> Result<Json<WordsPage>, ApiError> {
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.max(0);

    let words = word_index::list_words(&state.db, limit, offset).await?;
    let count = words.len();

    Ok(Json(WordsPage {
        words,
        count,
        limit,
        offset,
    }))
}

/// `GET /stats` — index totals plus queue depth.
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let index = word_index::stats(&state.db).await?;
    let pending_jobs = jobs::count_pending(&state.db).await?;

    Ok(Json(json!({
        "totalWords": index.total_words,
        "totalMappings": index.total_mappings,
        "pendingJobs": pending_jobs,
    })))
}
