//! Analysis transcript parsing
//!
//! The upstream model is instructed to emit one JSON object. Streamed
//! output accumulates into text that may carry markdown code fences;
//! this module strips the framing and extracts the structured fields.

use phrasefind_common::db::{BreakdownEntry, IdiomEntry};
use phrasefind_common::{Error, Result};
use serde::Deserialize;

/// Structured fields of a completed analysis.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedAnalysis {
    pub full_translation: String,
    pub literal_translation: String,
    pub grammar_analysis: String,
    #[serde(default)]
    pub breakdown: Vec<BreakdownEntry>,
    #[serde(default)]
    pub idioms: Vec<IdiomEntry>,
    #[serde(default)]
    pub difficulty_notes: Option<String>,
}

/// Parse accumulated model output into structured fields.
///
/// Strips optional ```/```json fences, then parses the first JSON object
/// found in the remaining text.
pub fn parse_analysis(text: &str) -> Result<ParsedAnalysis> {
    let stripped = strip_code_fences(text);

    // Tolerate prose around the object by slicing brace-to-brace
    let start = stripped.find('{');
    let end = stripped.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &stripped[s..=e],
        _ => {
            return Err(Error::Internal(
                "Analysis output contains no JSON object".to_string(),
            ))
        }
    };

    serde_json::from_str(json)
        .map_err(|e| Error::Internal(format!("Malformed analysis output: {}", e)))
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the language tag on the opening fence line
    let body = match without_open.find('\n') {
        Some(newline) => &without_open[newline + 1..],
        None => without_open,
    };

    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = r#"{
        "fullTranslation": "The cat sleeps.",
        "literalTranslation": "The cat it-sleeps.",
        "grammarAnalysis": "Present tense.",
        "breakdown": [{"word": "duerme", "translation": "sleeps", "partOfSpeech": "verb"}],
        "idioms": [],
        "difficultyNotes": "Beginner friendly."
    }"#;

    #[test]
    fn test_plain_json() {
        let parsed = parse_analysis(PLAIN).unwrap();
        assert_eq!(parsed.full_translation, "The cat sleeps.");
        assert_eq!(parsed.breakdown.len(), 1);
        assert_eq!(parsed.breakdown[0].word, "duerme");
        assert_eq!(parsed.difficulty_notes.as_deref(), Some("Beginner friendly."));
    }

    #[test]
    fn test_fenced_json() {
        let fenced = format!("```json\n{}\n```", PLAIN);
        let parsed = parse_analysis(&fenced).unwrap();
        assert_eq!(parsed.full_translation, "The cat sleeps.");
    }

    #[test]
    fn test_fence_without_language_tag() {
        let fenced = format!("```\n{}\n```", PLAIN);
        assert!(parse_analysis(&fenced).is_ok());
    }

    #[test]
    fn test_surrounding_prose_tolerated() {
        let noisy = format!("Here is the analysis:\n{}\nHope that helps!", PLAIN);
        assert!(parse_analysis(&noisy).is_ok());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let minimal = r#"{
            "fullTranslation": "Hi.",
            "literalTranslation": "Hi.",
            "grammarAnalysis": "Interjection."
        }"#;
        let parsed = parse_analysis(minimal).unwrap();
        assert!(parsed.breakdown.is_empty());
        assert!(parsed.idioms.is_empty());
        assert!(parsed.difficulty_notes.is_none());
    }

    #[test]
    fn test_no_json_is_error() {
        assert!(parse_analysis("sorry, I cannot help").is_err());
    }
}
