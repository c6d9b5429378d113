//! Shared record types for the persistent stores

use crate::query::QueryKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One timed caption line inside a stored segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionSpan {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A completed search result: the clip interval plus its captions.
///
/// Immutable after insert; keyed by the search fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRecord {
    pub fingerprint: String,
    pub query: String,
    pub video_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub caption: String,
    pub captions: Vec<CaptionSpan>,
    pub created_at: DateTime<Utc>,
}

/// Job lifecycle states.
///
/// Non-terminal states progress monotonically; `Completed` and `Failed` are
/// terminal and never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Searching,
    Downloading,
    Transcribing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Searching => "searching",
            JobStatus::Downloading => "downloading",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "searching" => Some(JobStatus::Searching),
            "downloading" => Some(JobStatus::Downloading),
            "transcribing" => Some(JobStatus::Transcribing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A queued or running search job. Exactly one row per fingerprint.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: Uuid,
    pub fingerprint: String,
    pub query: String,
    pub canonical: String,
    pub kind: QueryKind,
    pub status: JobStatus,
    pub current_video_id: Option<String>,
    pub result: Option<SegmentRecord>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One indexed example for a word: the segment it appears in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRef {
    pub video_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub caption: String,
}

/// A word-index entry with its examples in insertion order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordEntry {
    pub word: String,
    pub examples: Vec<SegmentRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One streamed chunk with its arrival offset relative to stream creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkLogEntry {
    pub text: String,
    pub timestamp_ms: i64,
}

/// One entry of the per-word breakdown inside an analysis.
///
/// The upstream model controls the exact shape, so secondary fields are
/// optional and unknown ones are dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownEntry {
    pub word: String,
    #[serde(default)]
    pub translation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One idiom or fixed expression found in the analyzed sentence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdiomEntry {
    pub phrase: String,
    #[serde(default)]
    pub meaning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
}

/// A persisted sentence analysis. The body is immutable; only
/// `access_count` and `last_accessed_at` move.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub fingerprint: String,
    pub sentence: String,
    pub target_word: String,
    pub target_language: String,
    pub native_language: String,
    pub context_before: Option<String>,
    pub context_after: Option<String>,
    pub full_translation: String,
    pub literal_translation: String,
    pub grammar_analysis: String,
    pub breakdown: Vec<BreakdownEntry>,
    pub idioms: Vec<IdiomEntry>,
    pub difficulty_notes: Option<String>,
    pub chunk_log: Option<Vec<ChunkLogEntry>>,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Parse an RFC 3339 timestamp column, falling back to the epoch on
/// malformed data rather than failing the whole row.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            tracing::warn!(value = s, "Malformed timestamp column, using epoch");
            DateTime::<Utc>::UNIX_EPOCH
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Searching,
            JobStatus::Downloading,
            JobStatus::Transcribing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Transcribing.is_terminal());
    }

    #[test]
    fn test_timestamp_parse() {
        let now = Utc::now();
        let parsed = parse_timestamp(&now.to_rfc3339());
        assert_eq!(parsed.timestamp(), now.timestamp());

        let fallback = parse_timestamp("not a timestamp");
        assert_eq!(fallback, DateTime::<Utc>::UNIX_EPOCH);
    }
}
