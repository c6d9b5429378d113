//! Analysis endpoints
//!
//! `POST /analyze` returns one JSON result; `POST /analyze/stream` speaks
//! SSE, coalescing concurrent identical requests behind one upstream call
//! and replaying cached transcripts with pacing.

use super::responses::{client_ip, quota_headers, ApiError};
use crate::analysis::{parse_analysis, AnalysisParams};
use crate::db::analyses;
use crate::quota::{check_ai_quota, check_throttle, QuotaDecision, ANALYZE_POLICY};
use crate::server::AppState;
use crate::streams::{spawn_cached_replay, StreamFrame, StreamRegistry};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::StreamExt;
use phrasefind_common::db::{AnalysisRecord, BreakdownEntry, IdiomEntry};
use phrasefind_common::human_time::format_retry_after;
use phrasefind_common::Error;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(flatten)]
    pub params: AnalysisParams,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub full_translation: String,
    pub literal_translation: String,
    pub grammar_analysis: String,
    pub breakdown: Vec<BreakdownEntry>,
    pub idioms: Vec<IdiomEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_notes: Option<String>,
    pub cached: bool,
    pub access_count: i64,
}

impl AnalyzeResponse {
    fn from_record(record: &AnalysisRecord, cached: bool, access_count: i64) -> Self {
        Self {
            full_translation: record.full_translation.clone(),
            literal_translation: record.literal_translation.clone(),
            grammar_analysis: record.grammar_analysis.clone(),
            breakdown: record.breakdown.clone(),
            idioms: record.idioms.clone(),
            difficulty_notes: record.difficulty_notes.clone(),
            cached,
            access_count,
        }
    }
}

/// Gate a request: generic throttle, then the AI quota. Returns the quota
/// decision for response headers, or the shaped denial response.
async fn gate(
    state: &AppState,
    user_id: Option<&str>,
    ip: &str,
) -> Result<QuotaDecision, Response> {
    if let Err(e) = check_throttle(&state.db, &ANALYZE_POLICY, user_id, ip).await {
        return Err(ApiError(e).into_response());
    }

    let decision = match check_ai_quota(&state.db, &state.subscriptions, &state.config, user_id, ip)
        .await
    {
        Ok(decision) => decision,
        Err(e) => return Err(ApiError(e).into_response()),
    };

    if !decision.allowed {
        let retry_after = decision.retry_after_seconds.unwrap_or(0);
        let mut response = (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Free analysis limit reached",
                "retryAfterSeconds": retry_after,
                "retryAfterFormatted": format_retry_after(retry_after),
            })),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response.headers_mut().extend(quota_headers(&decision.usage));
        return Err(response);
    }

    Ok(decision)
}

/// `POST /analyze`
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Response, ApiError> {
    request.params.validate()?;

    let ip = client_ip(&headers, peer);
    let decision = match gate(&state, request.user_id.as_deref(), &ip).await {
        Ok(decision) => decision,
        Err(denial) => return Ok(denial),
    };

    let fingerprint = request.params.fingerprint();

    // Cache hit
    if let Some(record) = analyses::find_by_fingerprint(&state.db, &fingerprint).await? {
        let access_count = analyses::touch_access(&state.db, &fingerprint).await?;
        let body = AnalyzeResponse::from_record(&record, true, access_count);
        let mut response = Json(body).into_response();
        response.headers_mut().extend(quota_headers(&decision.usage));
        return Ok(response);
    }

    // Miss: one upstream call, then best-effort persistence
    let text = state.provider.complete_analysis(&request.params).await?;
    let parsed = parse_analysis(&text)?;

    let record = AnalysisRecord {
        fingerprint: fingerprint.clone(),
        sentence: request.params.sentence.clone(),
        target_word: request.params.target_word.clone(),
        target_language: request.params.target_language.clone(),
        native_language: request.params.native_language.clone(),
        context_before: request.params.context_before.clone(),
        context_after: request.params.context_after.clone(),
        full_translation: parsed.full_translation,
        literal_translation: parsed.literal_translation,
        grammar_analysis: parsed.grammar_analysis,
        breakdown: parsed.breakdown,
        idioms: parsed.idioms,
        difficulty_notes: parsed.difficulty_notes,
        chunk_log: None,
        access_count: 1,
        created_at: Utc::now(),
        last_accessed_at: Utc::now(),
    };

    persist_with_retry(&state, &record).await;

    let body = AnalyzeResponse::from_record(&record, false, 1);
    let mut response = Json(body).into_response();
    response.headers_mut().extend(quota_headers(&decision.usage));
    Ok(response)
}

/// Cache save with 1 s / 2 s / 4 s backoff; failure never fails the
/// user-visible response.
async fn persist_with_retry(state: &AppState, record: &AnalysisRecord) {
    for attempt in 0..3u32 {
        match analyses::insert(&state.db, record).await {
            Ok(()) | Err(Error::DuplicateKey(_)) => return,
            Err(e) => {
                warn!(
                    fingerprint = %record.fingerprint,
                    attempt,
                    error = %e,
                    "Failed to persist analysis"
                );
                if attempt < 2 {
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                }
            }
        }
    }
}

/// `POST /analyze/stream`
pub async fn analyze_stream(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Response, ApiError> {
    request.params.validate()?;

    let ip = client_ip(&headers, peer);
    let decision = match gate(&state, request.user_id.as_deref(), &ip).await {
        Ok(decision) => decision,
        Err(denial) => return Ok(denial),
    };

    let fingerprint = request.params.fingerprint();
    let (tx, rx) = mpsc::unbounded_channel::<StreamFrame>();

    let mut guard: Option<SubscriberGuard> = None;

    if let Some(record) = analyses::find_by_fingerprint(&state.db, &fingerprint).await? {
        analyses::touch_access(&state.db, &fingerprint).await?;
        info!(fingerprint = %fingerprint, "Replaying cached analysis");
        spawn_cached_replay(record, tx);
    } else {
        state
            .registry
            .get_or_create(&fingerprint, request.params.clone())
            .await?;
        let subscriber_id = state.registry.subscribe(&fingerprint, tx).await?;
        guard = Some(SubscriberGuard {
            registry: Arc::clone(&state.registry),
            fingerprint: fingerprint.clone(),
            subscriber_id,
        });
    }

    Ok(sse_response(rx, guard, &decision))
}

/// Unsubscribes when the response body is dropped (client disconnect or
/// normal end of stream).
struct SubscriberGuard {
    registry: Arc<StreamRegistry>,
    fingerprint: String,
    subscriber_id: u64,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let fingerprint = self.fingerprint.clone();
        let subscriber_id = self.subscriber_id;
        tokio::spawn(async move {
            registry.unsubscribe(&fingerprint, subscriber_id).await;
        });
    }
}

fn sse_response(
    rx: mpsc::UnboundedReceiver<StreamFrame>,
    guard: Option<SubscriberGuard>,
    decision: &QuotaDecision,
) -> Response {
    let stream = UnboundedReceiverStream::new(rx).map(move |frame| {
        // The guard lives inside the stream closure so client disconnects
        // trigger unsubscribe
        let _keep_alive = &guard;
        Ok::<_, Infallible>(axum::body::Bytes::from(frame.to_sse_data()))
    });

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());

    response.headers_mut().extend(quota_headers(&decision.usage));
    response
}
