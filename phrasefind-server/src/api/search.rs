//! Search endpoints
//!
//! `POST /search` resolves a query against the segment cache, enqueues a
//! job on a miss, and reports job progress; `GET /search/:job_id` polls a
//! job by id.

use super::responses::{client_ip, ApiError};
use crate::db::{jobs, segments};
use crate::quota::{check_throttle, SEARCH_POLICY};
use crate::server::AppState;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use phrasefind_common::db::{CaptionSpan, JobRecord, JobStatus, SegmentRecord};
use phrasefind_common::{canonicalize, search_fingerprint, Error};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: Option<String>,
    pub job_id: Option<Uuid>,
    pub user_id: Option<String>,
}

/// Tagged search response: one variant per observable job state.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SearchResponse {
    #[serde(rename_all = "camelCase")]
    Completed {
        #[serde(skip_serializing_if = "Option::is_none")]
        job_id: Option<Uuid>,
        query: String,
        video_id: String,
        video_url: String,
        start_time: f64,
        end_time: f64,
        caption: String,
        captions: Vec<CaptionSpan>,
    },
    #[serde(rename_all = "camelCase")]
    Queued {
        job_id: Uuid,
        query: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Searching {
        job_id: Uuid,
        query: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Downloading {
        job_id: Uuid,
        query: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_video_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Transcribing {
        job_id: Uuid,
        query: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_video_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        job_id: Uuid,
        query: String,
        error: String,
    },
}

fn video_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

impl SearchResponse {
    fn from_segment(segment: &SegmentRecord, job_id: Option<Uuid>) -> Self {
        SearchResponse::Completed {
            job_id,
            query: segment.query.clone(),
            video_id: segment.video_id.clone(),
            video_url: video_url(&segment.video_id),
            start_time: segment.start_time,
            end_time: segment.end_time,
            caption: segment.caption.clone(),
            captions: segment.captions.clone(),
        }
    }

    fn from_job(job: &JobRecord) -> Result<Self, ApiError> {
        Ok(match job.status {
            JobStatus::Completed => {
                let segment = job.result.as_ref().ok_or_else(|| {
                    ApiError(Error::Internal(format!(
                        "completed job {} has no result",
                        job.id
                    )))
                })?;
                SearchResponse::from_segment(segment, Some(job.id))
            }
            JobStatus::Failed => SearchResponse::Failed {
                job_id: job.id,
                query: job.query.clone(),
                error: job
                    .error
                    .clone()
                    .unwrap_or_else(|| "Search failed".to_string()),
            },
            JobStatus::Queued => SearchResponse::Queued {
                job_id: job.id,
                query: job.query.clone(),
                message: "Your search is queued".to_string(),
            },
            JobStatus::Searching => SearchResponse::Searching {
                job_id: job.id,
                query: job.query.clone(),
                message: "Searching the video catalog".to_string(),
            },
            JobStatus::Downloading => SearchResponse::Downloading {
                job_id: job.id,
                query: job.query.clone(),
                message: "Downloading audio".to_string(),
                current_video_id: job.current_video_id.clone(),
            },
            JobStatus::Transcribing => SearchResponse::Transcribing {
                job_id: job.id,
                query: job.query.clone(),
                message: "Transcribing audio".to_string(),
                current_video_id: job.current_video_id.clone(),
            },
        })
    }
}

/// `POST /search`
pub async fn search(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let ip = client_ip(&headers, peer);
    check_throttle(&state.db, &SEARCH_POLICY, request.user_id.as_deref(), &ip).await?;

    // Poll by job id when supplied
    if let Some(job_id) = request.job_id {
        if let Some(job) = jobs::find_by_id(&state.db, job_id).await? {
            return Ok(Json(SearchResponse::from_job(&job)?));
        }
    }

    let raw_query = request
        .query
        .as_deref()
        .ok_or_else(|| Error::InvalidInput("query is required".to_string()))?;
    let canonical = canonicalize(raw_query)?;
    let fingerprint = search_fingerprint(&canonical.canonical);

    // Cache hit: answer directly, no job row
    if let Some(segment) = segments::find_by_fingerprint(&state.db, &fingerprint).await? {
        return Ok(Json(SearchResponse::from_segment(&segment, None)));
    }

    // Existing job: report its progress
    if let Some(job) = jobs::find_by_fingerprint(&state.db, &fingerprint).await? {
        return Ok(Json(SearchResponse::from_job(&job)?));
    }

    // Fresh query: enqueue
    let init = jobs::JobInit {
        fingerprint: fingerprint.clone(),
        query: raw_query.trim().to_string(),
        canonical: canonical.canonical.clone(),
        kind: canonical.kind,
    };
    let job = match jobs::create(&state.db, &init).await {
        Ok(job) => job,
        // A concurrent request won the insert; report its job
        Err(Error::DuplicateKey(_)) => jobs::find_by_fingerprint(&state.db, &fingerprint)
            .await?
            .ok_or_else(|| Error::Internal("job vanished after duplicate create".to_string()))?,
        Err(e) => return Err(e.into()),
    };

    info!(fingerprint = %fingerprint, job_id = %job.id, "Search job enqueued");
    Ok(Json(SearchResponse::from_job(&job)?))
}

/// `GET /search/:job_id`
pub async fn poll_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<SearchResponse>, ApiError> {
    let job = jobs::find_by_id(&state.db, job_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("no job with id {}", job_id)))?;

    Ok(Json(SearchResponse::from_job(&job)?))
}
