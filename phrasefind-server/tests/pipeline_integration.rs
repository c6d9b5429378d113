//! Job pipeline integration tests over mock adapters

mod helpers;

use helpers::{job_context, MockCatalog, MockTranscriber};
use phrasefind_common::db::{init_memory_database, JobStatus};
use phrasefind_common::query::QueryKind;
use phrasefind_common::search_fingerprint;
use phrasefind_server::db::{jobs, segments, word_index};
use phrasefind_server::pipeline::runner::run_job;
use std::collections::HashMap;

const PYTHON_VTT: &str = "\
WEBVTT

00:08.000 --> 00:11.400
So that was the setup for today.

00:11.400 --> 00:13.800
Python is a high-level

00:13.800 --> 00:16.200
programming language.

00:16.200 --> 00:19.000
Let's look at an example next.
";

async fn enqueue(db: &sqlx::SqlitePool, query: &str, kind: QueryKind) -> phrasefind_common::db::JobRecord {
    let canonical = query.to_lowercase();
    jobs::create(
        db,
        &jobs::JobInit {
            fingerprint: search_fingerprint(&canonical),
            query: query.to_string(),
            canonical,
            kind,
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn no_candidates_terminalizes_failed() {
    let db = init_memory_database().await.unwrap();
    let temp = tempfile::tempdir().unwrap();
    let ctx = job_context(
        &db,
        MockCatalog::empty(),
        MockTranscriber {
            captions: HashMap::new(),
        },
        temp.path().to_path_buf(),
    )
    .await;

    let job = enqueue(&db, "zxcvqwerty", QueryKind::Word).await;
    run_job(&ctx, job.clone()).await;

    let finished = jobs::find_by_fingerprint(&db, &job.fingerprint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(
        finished.error.as_deref(),
        Some("No videos found for this query")
    );
}

#[tokio::test]
async fn successful_pipeline_persists_and_indexes() {
    let db = init_memory_database().await.unwrap();
    let temp = tempfile::tempdir().unwrap();
    let ctx = job_context(
        &db,
        MockCatalog::with_videos(&["vid42"]),
        MockTranscriber::with_caption("vid42", PYTHON_VTT),
        temp.path().to_path_buf(),
    )
    .await;

    let job = enqueue(&db, "python", QueryKind::Word).await;
    run_job(&ctx, job.clone()).await;

    let finished = jobs::find_by_fingerprint(&db, &job.fingerprint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, JobStatus::Completed);

    let segment = finished.result.expect("completed job carries its segment");
    assert_eq!(segment.video_id, "vid42");
    // Sentence boundary: starts after "...today." and ends at "language."
    assert_eq!(
        segment.caption,
        "Python is a high-level programming language."
    );
    assert!((segment.start_time - 11.4).abs() < 1e-9);
    // End cue finishes at 16.2, plus 2s trailing padding
    assert!((segment.end_time - 18.2).abs() < 1e-9);

    // Cached in the result store
    let cached = segments::find_by_fingerprint(&db, &job.fingerprint)
        .await
        .unwrap()
        .expect("segment cached");
    assert_eq!(cached.video_id, "vid42");
    assert!(!cached.captions.is_empty());

    // Every caption word gained the segment reference exactly once
    for word in ["python", "is", "a", "high", "level", "programming", "language"] {
        let entry = word_index::find_by_word(&db, word)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("word '{}' missing from index", word));
        assert_eq!(entry.examples.len(), 1, "word '{}'", word);
        assert_eq!(entry.examples[0].video_id, "vid42");
    }

    // Scratch files are gone
    let mut entries = tokio::fs::read_dir(temp.path()).await.unwrap();
    let mut leftovers = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        leftovers.push(entry.file_name());
    }
    assert!(leftovers.is_empty(), "scratch not cleaned: {:?}", leftovers);
}

#[tokio::test]
async fn non_embeddable_candidates_are_skipped() {
    let db = init_memory_database().await.unwrap();
    let temp = tempfile::tempdir().unwrap();

    let mut catalog = MockCatalog::with_videos(&["blocked", "vid42"]);
    catalog.non_embeddable.insert("blocked".to_string());

    let ctx = job_context(
        &db,
        catalog,
        MockTranscriber::with_caption("vid42", PYTHON_VTT),
        temp.path().to_path_buf(),
    )
    .await;

    let job = enqueue(&db, "python", QueryKind::Word).await;
    run_job(&ctx, job.clone()).await;

    let finished = jobs::find_by_fingerprint(&db, &job.fingerprint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.result.unwrap().video_id, "vid42");
}

#[tokio::test]
async fn non_english_captions_fail_the_job_after_exhaustion() {
    let db = init_memory_database().await.unwrap();
    let temp = tempfile::tempdir().unwrap();

    // The phrase appears, so transcription early-stops, but the captions
    // flunk the function-word gate
    let spanish = "\
WEBVTT

00:01.000 --> 00:04.000
python es un lenguaje de programacion muy popular hoy.
";

    let ctx = job_context(
        &db,
        MockCatalog::with_videos(&["vid99"]),
        MockTranscriber::with_caption("vid99", spanish),
        temp.path().to_path_buf(),
    )
    .await;

    let job = enqueue(&db, "python", QueryKind::Word).await;
    run_job(&ctx, job.clone()).await;

    let finished = jobs::find_by_fingerprint(&db, &job.fingerprint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(
        finished.error.as_deref(),
        Some("No English video found (tried 1 videos)")
    );
}

#[tokio::test]
async fn phrase_absent_from_audio_skips_video() {
    let db = init_memory_database().await.unwrap();
    let temp = tempfile::tempdir().unwrap();

    let unrelated = "\
WEBVTT

00:01.000 --> 00:04.000
This video is about the history of tea and nothing else at all.
";

    let ctx = job_context(
        &db,
        MockCatalog::with_videos(&["vid7"]),
        MockTranscriber::with_caption("vid7", unrelated),
        temp.path().to_path_buf(),
    )
    .await;

    let job = enqueue(&db, "python", QueryKind::Word).await;
    run_job(&ctx, job.clone()).await;

    let finished = jobs::find_by_fingerprint(&db, &job.fingerprint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
}

#[tokio::test]
async fn duplicate_segment_insert_is_swallowed() {
    let db = init_memory_database().await.unwrap();
    let temp = tempfile::tempdir().unwrap();
    let ctx = job_context(
        &db,
        MockCatalog::with_videos(&["vid42"]),
        MockTranscriber::with_caption("vid42", PYTHON_VTT),
        temp.path().to_path_buf(),
    )
    .await;

    let job = enqueue(&db, "python", QueryKind::Word).await;

    // Pre-seed the result store under the same fingerprint
    let seeded = phrasefind_common::db::SegmentRecord {
        fingerprint: job.fingerprint.clone(),
        query: "python".to_string(),
        video_id: "earlier".to_string(),
        start_time: 1.0,
        end_time: 2.0,
        caption: "Earlier result.".to_string(),
        captions: vec![],
        created_at: chrono::Utc::now(),
    };
    segments::insert(&db, &seeded).await.unwrap();

    run_job(&ctx, job.clone()).await;

    // The job still completes, and the earlier cache entry is untouched
    let finished = jobs::find_by_fingerprint(&db, &job.fingerprint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, JobStatus::Completed);

    let cached = segments::find_by_fingerprint(&db, &job.fingerprint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.video_id, "earlier");
}
