//! Paced replay
//!
//! Replays accumulated or persisted chunk logs to a subscriber with
//! artificial pacing: compressed relative to the original arrival times,
//! but never so fast the client renders one burst.

use super::StreamFrame;
use phrasefind_common::db::AnalysisRecord;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Synthesized chunk size for legacy records without a stored chunk log.
const SYNTH_CHUNK_CHARS: usize = 100;
/// Delay between synthesized chunks.
const SYNTH_CHUNK_DELAY: Duration = Duration::from_millis(15);

/// Pacing law: a third of the original inter-chunk gap, clamped to
/// [5 ms, 30 ms].
pub fn pace_delay(current_ms: i64, next_ms: i64) -> Duration {
    let paced = (next_ms - current_ms) / 3;
    Duration::from_millis(paced.clamp(5, 30) as u64)
}

/// Stream a cached analysis back to one subscriber.
///
/// Records with a chunk log replay it under the live pacing law; legacy
/// records are re-chunked at whitespace/punctuation boundaries with fixed
/// delays. Ends with a `done` frame reconstructed from the structured
/// fields. Aborts silently when the connection goes away.
pub fn spawn_cached_replay(
    record: AnalysisRecord,
    tx: mpsc::UnboundedSender<StreamFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let full_response = reconstruct_full_response(&record);

        match record.chunk_log.as_ref().filter(|log| !log.is_empty()) {
            Some(log) => {
                debug!(fingerprint = %record.fingerprint, chunks = log.len(), "Replaying cached chunk log");
                for (i, entry) in log.iter().enumerate() {
                    if tx.send(StreamFrame::Chunk(entry.text.clone())).is_err() {
                        return;
                    }
                    if let Some(next) = log.get(i + 1) {
                        tokio::time::sleep(pace_delay(entry.timestamp_ms, next.timestamp_ms))
                            .await;
                    }
                }
            }
            None => {
                debug!(fingerprint = %record.fingerprint, "Replaying legacy record via synthesized chunks");
                for chunk in synthesize_chunks(&full_response, SYNTH_CHUNK_CHARS) {
                    if tx.send(StreamFrame::Chunk(chunk)).is_err() {
                        return;
                    }
                    tokio::time::sleep(SYNTH_CHUNK_DELAY).await;
                }
            }
        }

        let _ = tx.send(StreamFrame::Done { full_response });
    })
}

/// Rebuild the full response JSON from the structured fields.
pub fn reconstruct_full_response(record: &AnalysisRecord) -> String {
    let mut body = serde_json::json!({
        "fullTranslation": record.full_translation,
        "literalTranslation": record.literal_translation,
        "grammarAnalysis": record.grammar_analysis,
        "breakdown": record.breakdown,
        "idioms": record.idioms,
    });
    if let Some(notes) = &record.difficulty_notes {
        body["difficultyNotes"] = serde_json::json!(notes);
    }
    body.to_string()
}

/// Split text into chunks of at most `max_chars`, preferring to break at
/// whitespace or punctuation.
pub fn synthesize_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let hard_end = (start + max_chars).min(chars.len());
        let mut cut = hard_end;

        if hard_end < chars.len() {
            // Backtrack to the last break-friendly character
            let mut i = hard_end;
            while i > start {
                let c = chars[i - 1];
                if c.is_whitespace() || matches!(c, ',' | '.' | ';' | ':' | '!' | '?') {
                    cut = i;
                    break;
                }
                i -= 1;
            }
            if i == start {
                cut = hard_end;
            }
        }

        chunks.push(chars[start..cut].iter().collect());
        start = cut;
    }

    chunks
}
