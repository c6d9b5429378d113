//! Stream registry integration tests: coalescing, fan-out ordering, late
//! joiners, and error propagation

mod helpers;

use helpers::{analysis_params, json_chunks, MockAnalysisProvider, ANALYSIS_JSON};
use phrasefind_common::db::init_memory_database;
use phrasefind_server::db::analyses;
use phrasefind_server::streams::{StreamFrame, StreamRegistry};
use std::sync::Arc;
use std::time::Duration;
use serial_test::serial;
use tokio::sync::mpsc;

/// Drain a subscriber channel to its end, returning (chunks, terminal).
async fn drain(
    mut rx: mpsc::UnboundedReceiver<StreamFrame>,
) -> (Vec<String>, Option<StreamFrame>) {
    let mut chunks = Vec::new();
    let mut terminal = None;
    while let Some(frame) =
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("stream stalled")
    {
        match frame {
            StreamFrame::Chunk(text) => chunks.push(text),
            other => {
                terminal = Some(other);
                break;
            }
        }
    }
    (chunks, terminal)
}

#[tokio::test]
#[serial]
async fn coalesces_concurrent_requests_into_one_upstream_call() {
    let db = init_memory_database().await.unwrap();
    let provider = Arc::new(MockAnalysisProvider {
        chunks: json_chunks(),
        chunk_delay: Duration::from_millis(10),
        calls: std::sync::atomic::AtomicU32::new(0),
        fail_with: None,
    });
    let registry = StreamRegistry::new(db.clone(), provider.clone(), 100);

    let params = analysis_params();
    let fingerprint = params.fingerprint();

    // Two clients arrive within moments of each other
    let stream_a = registry
        .get_or_create(&fingerprint, params.clone())
        .await
        .unwrap();
    let stream_b = registry
        .get_or_create(&fingerprint, params.clone())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&stream_a, &stream_b));

    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    registry.subscribe(&fingerprint, tx_a).await.unwrap();
    registry.subscribe(&fingerprint, tx_b).await.unwrap();

    let (chunks_a, done_a) = drain(rx_a).await;
    let (chunks_b, done_b) = drain(rx_b).await;

    // Exactly one upstream call was made
    assert_eq!(provider.call_count(), 1);

    // Both clients see the full ordered sequence and a done frame
    assert_eq!(chunks_a.concat(), ANALYSIS_JSON);
    assert_eq!(chunks_a, chunks_b);
    match (done_a, done_b) {
        (
            Some(StreamFrame::Done { full_response: a }),
            Some(StreamFrame::Done { full_response: b }),
        ) => {
            assert_eq!(a, ANALYSIS_JSON);
            assert_eq!(a, b);
        }
        other => panic!("expected done frames, got {:?}", other),
    }

    // The analysis cache holds one fresh record
    tokio::time::sleep(Duration::from_millis(100)).await;
    let record = analyses::find_by_fingerprint(&db, &fingerprint)
        .await
        .unwrap()
        .expect("analysis persisted");
    assert_eq!(record.access_count, 1);
    assert_eq!(record.full_translation, "The cat sleeps.");
    assert!(record.chunk_log.is_some());
}

#[tokio::test]
#[serial]
async fn late_joiner_replays_then_goes_live_without_loss() {
    let db = init_memory_database().await.unwrap();
    let provider = Arc::new(MockAnalysisProvider {
        chunks: (0..40).map(|i| format!("[{}]", i)).collect(),
        chunk_delay: Duration::from_millis(12),
        calls: std::sync::atomic::AtomicU32::new(0),
        fail_with: None,
    });
    let registry = StreamRegistry::new(db.clone(), provider.clone(), 100);

    let params = analysis_params();
    let fingerprint = params.fingerprint();
    registry
        .get_or_create(&fingerprint, params.clone())
        .await
        .unwrap();

    let (tx_a, rx_a) = mpsc::unbounded_channel();
    registry.subscribe(&fingerprint, tx_a).await.unwrap();

    // Let the stream accumulate a prefix, then join late
    tokio::time::sleep(Duration::from_millis(150)).await;
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    registry.subscribe(&fingerprint, tx_b).await.unwrap();

    let (chunks_a, done_a) = drain(rx_a).await;
    let (chunks_b, done_b) = drain(rx_b).await;

    let expected: Vec<String> = (0..40).map(|i| format!("[{}]", i)).collect();
    assert_eq!(chunks_a, expected, "early subscriber sees every chunk once");
    assert_eq!(chunks_b, expected, "late joiner sees every chunk once, in order");
    assert!(matches!(done_a, Some(StreamFrame::Done { .. })));
    assert!(matches!(done_b, Some(StreamFrame::Done { .. })));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn joiner_after_completion_replays_from_registry() {
    let db = init_memory_database().await.unwrap();
    let provider = Arc::new(MockAnalysisProvider::with_chunks(&["hello ", "world"]));
    let registry = StreamRegistry::new(db.clone(), provider.clone(), 100);

    let params = analysis_params();
    let fingerprint = params.fingerprint();
    registry
        .get_or_create(&fingerprint, params.clone())
        .await
        .unwrap();

    // Wait for the driver to finish; the stream lingers in the registry
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.stream_count().await, 1);

    let (tx, rx) = mpsc::unbounded_channel();
    registry.subscribe(&fingerprint, tx).await.unwrap();

    let (chunks, terminal) = drain(rx).await;
    assert_eq!(chunks.concat(), "hello world");
    match terminal {
        Some(StreamFrame::Done { full_response }) => assert_eq!(full_response, "hello world"),
        other => panic!("expected done frame, got {:?}", other),
    }
}

#[tokio::test]
async fn upstream_failure_emits_error_frame() {
    let db = init_memory_database().await.unwrap();
    let provider = Arc::new(MockAnalysisProvider::failing("model melted"));
    let registry = StreamRegistry::new(db.clone(), provider.clone(), 100);

    let params = analysis_params();
    let fingerprint = params.fingerprint();
    registry
        .get_or_create(&fingerprint, params.clone())
        .await
        .unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    // Subscribe may race the failure; either path must yield an error frame
    let _ = registry.subscribe(&fingerprint, tx).await;

    let (chunks, terminal) = drain(rx).await;
    assert!(chunks.is_empty());
    match terminal {
        Some(StreamFrame::Error(message)) => assert!(message.contains("model melted")),
        other => panic!("expected error frame, got {:?}", other),
    }

    // Nothing was cached
    assert!(analyses::find_by_fingerprint(&db, &fingerprint)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn unsubscribed_stream_still_persists() {
    let db = init_memory_database().await.unwrap();
    let provider = Arc::new(MockAnalysisProvider {
        chunks: json_chunks(),
        chunk_delay: Duration::from_millis(10),
        calls: std::sync::atomic::AtomicU32::new(0),
        fail_with: None,
    });
    let registry = StreamRegistry::new(db.clone(), provider.clone(), 100);

    let params = analysis_params();
    let fingerprint = params.fingerprint();
    registry
        .get_or_create(&fingerprint, params.clone())
        .await
        .unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let id = registry.subscribe(&fingerprint, tx).await.unwrap();

    // Client walks away mid-stream; the driver keeps going
    tokio::time::sleep(Duration::from_millis(30)).await;
    registry.unsubscribe(&fingerprint, id).await;
    drop(rx);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(analyses::find_by_fingerprint(&db, &fingerprint)
        .await
        .unwrap()
        .is_some());
}
