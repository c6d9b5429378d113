//! Query canonicalization
//!
//! Every search query passes through `canonicalize` exactly once before
//! fingerprinting; the canonical form is the sole cache key input.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Maximum accepted query length in characters (after trimming).
pub const MAX_QUERY_CHARS: usize = 200;

/// Classification of a canonical query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// A single word with no internal punctuation.
    Word,
    /// Anything containing whitespace or terminal punctuation.
    Sentence,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Word => "word",
            QueryKind::Sentence => "sentence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "word" => Some(QueryKind::Word),
            "sentence" => Some(QueryKind::Sentence),
            _ => None,
        }
    }
}

/// A canonicalized query: trimmed, lowercased, length-bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalQuery {
    pub canonical: String,
    pub kind: QueryKind,
}

/// Canonicalize a raw query string.
///
/// Single pass: trim outer whitespace, lowercase, reject empty or
/// over-length input. A query is a `Sentence` if it contains whitespace or
/// any of `.,!?;:`, otherwise a `Word`.
pub fn canonicalize(raw: &str) -> Result<CanonicalQuery> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("query must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_QUERY_CHARS {
        return Err(Error::InvalidInput(format!(
            "query exceeds {} characters",
            MAX_QUERY_CHARS
        )));
    }

    let canonical = trimmed.to_lowercase();
    let kind = if canonical
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '.' | ',' | '!' | '?' | ';' | ':'))
    {
        QueryKind::Sentence
    } else {
        QueryKind::Word
    };

    Ok(CanonicalQuery { canonical, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_classification() {
        let q = canonicalize("  Hello ").unwrap();
        assert_eq!(q.canonical, "hello");
        assert_eq!(q.kind, QueryKind::Word);
    }

    #[test]
    fn test_sentence_classification() {
        let q = canonicalize("Hello world").unwrap();
        assert_eq!(q.kind, QueryKind::Sentence);

        // Terminal punctuation alone also classifies as sentence
        let q = canonicalize("hello!").unwrap();
        assert_eq!(q.kind, QueryKind::Sentence);

        let q = canonicalize("a,b").unwrap();
        assert_eq!(q.kind, QueryKind::Sentence);
    }

    #[test]
    fn test_rejects_empty() {
        assert!(canonicalize("").is_err());
        assert!(canonicalize("   ").is_err());
    }

    #[test]
    fn test_rejects_over_length() {
        let long = "a".repeat(201);
        assert!(canonicalize(&long).is_err());

        let at_limit = "a".repeat(200);
        assert!(canonicalize(&at_limit).is_ok());
    }

    #[test]
    fn test_idempotent() {
        for raw in ["  HeLLo  ", "Python is great.", "WORD"] {
            let once = canonicalize(raw).unwrap();
            let twice = canonicalize(&once.canonical).unwrap();
            assert_eq!(once, twice);
        }
    }
}
