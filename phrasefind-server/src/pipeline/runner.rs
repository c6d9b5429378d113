//! Per-job state machine
//!
//! Drives a single search job from `queued` to a terminal state. Phase
//! transitions are atomic writes to the job store; clients observe
//! progress by polling. Errors inside a candidate are isolated to that
//! candidate; only exhaustion, timeout, or infra faults fail the job.

use crate::adapters::{ToolAdapters, VideoCandidate};
use crate::captions::{extract_words, parse_webvtt, Cue};
use crate::db::{jobs, segments, word_index};
use crate::matching::{detect_sentence_bounds, find_match};
use crate::pipeline::english::is_english;
use crate::pipeline::strategies::search_strategies;
use chrono::Utc;
use phrasefind_common::config::ServiceConfig;
use phrasefind_common::db::{CaptionSpan, JobRecord, JobStatus, SegmentRecord, SegmentRef};
use phrasefind_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything a job task needs, cloned per dispatch.
#[derive(Clone)]
pub struct JobContext {
    pub db: SqlitePool,
    pub adapters: ToolAdapters,
    pub config: ServiceConfig,
    /// Scratch directory for downloaded audio and caption derivatives.
    pub temp_dir: PathBuf,
}

/// Run one job to a terminal state. Never returns an error: infra faults
/// terminalize the job as `failed`.
pub async fn run_job(ctx: &JobContext, job: JobRecord) {
    let fingerprint = job.fingerprint.clone();
    info!(fingerprint = %fingerprint, query = %job.query, "Job started");

    if let Err(e) = run_job_inner(ctx, &job).await {
        error!(fingerprint = %fingerprint, error = %e, "Job failed on infrastructure error");
        if let Err(e2) = jobs::set_error(&ctx.db, &fingerprint, &format!("Search failed: {}", e)).await
        {
            error!(fingerprint = %fingerprint, error = %e2, "Failed to terminalize job");
        }
    }
}

async fn run_job_inner(ctx: &JobContext, job: &JobRecord) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(ctx.config.job_timeout_minutes * 60);

    jobs::set_status(&ctx.db, &job.fingerprint, JobStatus::Searching, None).await?;

    let candidates = collect_candidates(ctx, job).await;
    if candidates.is_empty() {
        info!(fingerprint = %job.fingerprint, "No candidates from any strategy");
        jobs::set_error(&ctx.db, &job.fingerprint, "No videos found for this query").await?;
        return Ok(());
    }

    let mut tried = 0usize;
    for candidate in &candidates {
        // Wall-clock bound is checked before each candidate
        if Instant::now() >= deadline {
            jobs::set_error(
                &ctx.db,
                &job.fingerprint,
                &format!(
                    "Search timed out after {} minutes",
                    ctx.config.job_timeout_minutes
                ),
            )
            .await?;
            return Ok(());
        }

        tried += 1;
        match evaluate_candidate(ctx, job, candidate).await {
            Ok(Some(segment)) => {
                finish_job(ctx, job, segment).await?;
                return Ok(());
            }
            Ok(None) => continue,
            Err(e) => {
                // Candidate-scoped fault: log and move on
                warn!(
                    fingerprint = %job.fingerprint,
                    video_id = %candidate.video_id,
                    error = %e,
                    "Candidate failed, continuing with next"
                );
                continue;
            }
        }
    }

    jobs::set_error(
        &ctx.db,
        &job.fingerprint,
        &format!("No English video found (tried {} videos)", tried),
    )
    .await?;

    Ok(())
}

/// Query each strategy in order, deduplicating by video id, until the
/// candidate cap is reached or strategies are exhausted. Strategy-level
/// catalog errors are logged and skipped.
async fn collect_candidates(ctx: &JobContext, job: &JobRecord) -> Vec<VideoCandidate> {
    let mut candidates = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for strategy in search_strategies(&job.canonical, job.kind) {
        if candidates.len() >= ctx.config.search_max_candidates {
            break;
        }

        match ctx
            .adapters
            .catalog
            .search(&strategy, ctx.config.search_results_per_strategy)
            .await
        {
            Ok(results) => {
                for candidate in results {
                    if seen.insert(candidate.video_id.clone()) {
                        candidates.push(candidate);
                        if candidates.len() >= ctx.config.search_max_candidates {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(strategy = %strategy, error = %e, "Catalog search strategy failed");
            }
        }
    }

    candidates
}

/// Evaluate one candidate video. Returns the segment on success, None to
/// skip. Scratch files are removed regardless of outcome.
async fn evaluate_candidate(
    ctx: &JobContext,
    job: &JobRecord,
    candidate: &VideoCandidate,
) -> Result<Option<SegmentRecord>> {
    let result = evaluate_candidate_inner(ctx, job, candidate).await;
    cleanup_scratch(&ctx.temp_dir, &candidate.video_id).await;
    result
}

async fn evaluate_candidate_inner(
    ctx: &JobContext,
    job: &JobRecord,
    candidate: &VideoCandidate,
) -> Result<Option<SegmentRecord>> {
    let video_id = &candidate.video_id;

    if !ctx.adapters.catalog.is_embeddable(video_id).await? {
        info!(video_id = %video_id, "Skipping non-embeddable video");
        return Ok(None);
    }

    jobs::set_status(
        &ctx.db,
        &job.fingerprint,
        JobStatus::Downloading,
        Some(video_id),
    )
    .await?;

    tokio::fs::create_dir_all(&ctx.temp_dir).await?;
    let audio = ctx
        .adapters
        .downloader
        .download_audio(video_id, &ctx.temp_dir)
        .await?;

    jobs::set_status(
        &ctx.db,
        &job.fingerprint,
        JobStatus::Transcribing,
        Some(video_id),
    )
    .await?;

    let outcome = ctx
        .adapters
        .transcriber
        .transcribe(
            &audio,
            &job.canonical,
            ctx.config.transcribe_chunk_seconds,
            ctx.config.transcribe_max_chunks,
        )
        .await?;

    if !outcome.early_stopped {
        info!(
            video_id = %video_id,
            chunks = outcome.chunks_processed,
            "Phrase not heard within chunk cap, skipping video"
        );
        return Ok(None);
    }

    let content = tokio::fs::read_to_string(&outcome.caption_path).await?;
    let cues = parse_webvtt(&content);
    if cues.is_empty() {
        return Ok(None);
    }

    let joined: String = cues
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    if !is_english(
        &joined,
        ctx.config.english_min_function_words,
        ctx.config.english_max_nonascii_ratio,
    ) {
        info!(video_id = %video_id, "Captions failed English gate, skipping video");
        return Ok(None);
    }

    let Some(match_index) = find_match(&cues, &job.canonical, job.kind) else {
        info!(video_id = %video_id, "No phrase match in parsed captions, skipping video");
        return Ok(None);
    };

    let bounds = detect_sentence_bounds(
        &cues,
        match_index,
        ctx.config.segment_end_padding_seconds,
    );

    let captions = overlapping_spans(&cues, bounds.start_time, bounds.end_time);

    Ok(Some(SegmentRecord {
        fingerprint: job.fingerprint.clone(),
        query: job.query.clone(),
        video_id: video_id.clone(),
        start_time: bounds.start_time,
        end_time: bounds.end_time,
        caption: bounds.caption,
        captions,
        created_at: Utc::now(),
    }))
}

/// Caption spans overlapping the clip interval.
fn overlapping_spans(cues: &[Cue], start_time: f64, end_time: f64) -> Vec<CaptionSpan> {
    cues.iter()
        .filter(|cue| cue.start < end_time && cue.end() > start_time)
        .map(|cue| CaptionSpan {
            start: cue.start,
            end: cue.end(),
            text: cue.text.clone(),
        })
        .collect()
}

/// Terminalize a successful job: record the result, cache the segment, and
/// index its words.
async fn finish_job(ctx: &JobContext, job: &JobRecord, segment: SegmentRecord) -> Result<()> {
    jobs::set_result(&ctx.db, &job.fingerprint, &segment).await?;

    match segments::insert(&ctx.db, &segment).await {
        Ok(()) => {}
        // A concurrent run already cached this fingerprint; the existing
        // record wins and is never mutated.
        Err(Error::DuplicateKey(_)) => {
            info!(fingerprint = %job.fingerprint, "Segment already cached");
        }
        Err(e) => return Err(e),
    }

    let words = extract_words(&segment.caption);
    let segment_ref = SegmentRef {
        video_id: segment.video_id.clone(),
        start_time: segment.start_time,
        end_time: segment.end_time,
        caption: segment.caption.clone(),
    };
    word_index::add_segment_to_words(&ctx.db, &words, &segment_ref).await?;

    info!(
        fingerprint = %job.fingerprint,
        video_id = %segment.video_id,
        words = words.len(),
        "Job completed"
    );

    Ok(())
}

/// Remove all scratch files derived from one candidate video.
async fn cleanup_scratch(temp_dir: &std::path::Path, video_id: &str) {
    let Ok(mut entries) = tokio::fs::read_dir(temp_dir).await else {
        return;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(video_id) {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove scratch file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(text: &str, start: f64, duration: f64) -> Cue {
        Cue {
            text: text.to_string(),
            start,
            duration,
        }
    }

    #[test]
    fn test_overlapping_spans_selects_interval() {
        let cues = vec![
            cue("before.", 0.0, 2.0),
            cue("inside one", 2.0, 2.0),
            cue("inside two.", 4.0, 2.0),
            cue("after.", 10.0, 2.0),
        ];
        let spans = overlapping_spans(&cues, 2.0, 8.0);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "inside one");
        assert_eq!(spans[1].text, "inside two.");
    }

    #[test]
    fn test_overlapping_spans_includes_partial_overlap() {
        let cues = vec![cue("straddles the start", 1.0, 3.0)];
        let spans = overlapping_spans(&cues, 2.0, 10.0);
        assert_eq!(spans.len(), 1);
    }
}
