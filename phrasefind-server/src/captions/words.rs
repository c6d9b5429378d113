//! Word extraction for the reverse index

/// Punctuation replaced with spaces before splitting.
const PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '\'', '"', '(', ')', '[', ']', '{', '}', '—', '–', '-',
];

/// Extract the distinct words of a caption, in first-occurrence order.
///
/// Lowercases, replaces punctuation with spaces, splits on whitespace,
/// drops empties, and deduplicates.
pub fn extract_words(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if PUNCTUATION.contains(&c) { ' ' } else { c })
        .collect();

    let mut seen = std::collections::HashSet::new();
    let mut words = Vec::new();
    for token in cleaned.split_whitespace() {
        if seen.insert(token.to_string()) {
            words.push(token.to_string());
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extraction() {
        let words = extract_words("Python is a high-level programming language.");
        assert_eq!(
            words,
            vec!["python", "is", "a", "high", "level", "programming", "language"]
        );
    }

    #[test]
    fn test_deduplication_preserves_first_occurrence() {
        let words = extract_words("the cat and the dog");
        assert_eq!(words, vec!["the", "cat", "and", "dog"]);
    }

    #[test]
    fn test_punctuation_and_quotes() {
        let words = extract_words("\"Hello,\" she said (quietly) — twice!");
        assert_eq!(words, vec!["hello", "she", "said", "quietly", "twice"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(extract_words("").is_empty());
        assert!(extract_words("...!!!").is_empty());
    }
}
