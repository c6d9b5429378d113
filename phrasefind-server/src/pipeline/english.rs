//! English-language gating heuristic
//!
//! Candidate captions are accepted only when they look like English:
//! enough common function words appear as isolated tokens and the
//! non-ASCII character ratio stays low. Both thresholds are configurable
//! (heavy-proper-noun content can trip the defaults).

/// Common English function words counted as isolated tokens.
const FUNCTION_WORDS: &[&str] = &[
    "the", "be", "to", "of", "and", "a", "in", "that", "have", "it", "is", "was", "for", "on",
    "are", "with", "as", "this", "at", "but", "they", "you", "we", "not", "from",
];

/// Count of function-word occurrences as isolated tokens.
pub fn function_word_hits(text: &str) -> usize {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|token| FUNCTION_WORDS.contains(token))
        .count()
}

/// Ratio of non-ASCII characters to total characters (0.0 for empty text).
pub fn non_ascii_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let non_ascii = text.chars().filter(|c| !c.is_ascii()).count();
    non_ascii as f64 / total as f64
}

/// Accept iff function-word hits reach `min_hits` and the non-ASCII ratio
/// stays below `max_ratio`.
pub fn is_english(text: &str, min_hits: usize, max_ratio: f64) -> bool {
    function_word_hits(text) >= min_hits && non_ascii_ratio(text) < max_ratio
}
