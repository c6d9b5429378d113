//! The streaming analysis coalescer
//!
//! At most one upstream AI call runs per analysis fingerprint; all
//! concurrent viewers subscribe to the same active stream. Late joiners
//! replay the accumulated chunk log with pacing, then hand over to live
//! delivery without losing or duplicating a chunk.

pub mod provider;
pub mod registry;
pub mod replay;

pub use provider::{AnalysisProvider, OpenAiCompatProvider};
pub use registry::{StreamRegistry, StreamStatus};
pub use replay::spawn_cached_replay;

/// One frame delivered to a subscriber connection.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Chunk(String),
    Done { full_response: String },
    Error(String),
}

impl StreamFrame {
    /// Render as one SSE data frame.
    pub fn to_sse_data(&self) -> String {
        let payload = match self {
            StreamFrame::Chunk(text) => serde_json::json!({ "chunk": text }),
            StreamFrame::Done { full_response } => {
                serde_json::json!({ "done": true, "fullResponse": full_response })
            }
            StreamFrame::Error(message) => serde_json::json!({ "error": message }),
        };
        format!("data: {}\n\n", payload)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamFrame::Chunk(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_framing() {
        let frame = StreamFrame::Chunk("hello".to_string());
        assert_eq!(frame.to_sse_data(), "data: {\"chunk\":\"hello\"}\n\n");

        let done = StreamFrame::Done {
            full_response: "x".to_string(),
        };
        let rendered = done.to_sse_data();
        assert!(rendered.starts_with("data: "));
        assert!(rendered.contains("\"done\":true"));
        assert!(rendered.ends_with("\n\n"));
    }

    #[test]
    fn test_terminal_classification() {
        assert!(!StreamFrame::Chunk("x".to_string()).is_terminal());
        assert!(StreamFrame::Done {
            full_response: String::new()
        }
        .is_terminal());
        assert!(StreamFrame::Error("e".to_string()).is_terminal());
    }
}
