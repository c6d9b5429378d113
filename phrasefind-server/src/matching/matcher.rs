//! Variation-tolerant phrase matching over caption lists

use super::variations::variations;
use crate::captions::Cue;
use phrasefind_common::query::QueryKind;
use regex::Regex;

/// How many consecutive cues a fuzzy sentence window spans.
const FUZZY_WINDOW: usize = 3;

/// Whether any variation of `token` appears in `text` as a word-boundary
/// prefix (`\bV\w*`). Both sides are matched lowercase.
fn token_matches(token: &str, text_lower: &str) -> bool {
    variations(token).iter().any(|v| {
        let pattern = format!(r"\b{}\w*", regex::escape(v));
        Regex::new(&pattern)
            .expect("escaped variation regex is valid")
            .is_match(text_lower)
    })
}

/// Whether the phrase (every token, with variations) appears in free text.
///
/// Used by the transcription early-stop check, where no cue structure
/// exists yet.
pub fn phrase_appears_in_text(phrase: &str, text: &str) -> bool {
    let text_lower = text.to_lowercase();
    let tokens: Vec<&str> = phrase.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }
    tokens.iter().all(|token| token_matches(token, &text_lower))
}

/// Find the cue index where the canonical query matches.
///
/// Three passes, first hit wins:
/// 1. exact — whole-word regex for words, substring for sentences;
/// 2. fuzzy (sentences) — every phrase token with variations inside a
///    3-cue window;
/// 3. loose (words) — plain substring.
pub fn find_match(cues: &[Cue], canonical: &str, kind: QueryKind) -> Option<usize> {
    // Pass 1: exact
    match kind {
        QueryKind::Word => {
            let pattern = format!(r"\b{}\b", regex::escape(canonical));
            let re = Regex::new(&pattern).expect("escaped word regex is valid");
            for (i, cue) in cues.iter().enumerate() {
                if re.is_match(&cue.text.to_lowercase()) {
                    return Some(i);
                }
            }
        }
        QueryKind::Sentence => {
            for (i, cue) in cues.iter().enumerate() {
                if cue.text.to_lowercase().contains(canonical) {
                    return Some(i);
                }
            }
        }
    }

    // Pass 2: fuzzy windows for sentences
    if kind == QueryKind::Sentence {
        let tokens: Vec<&str> = canonical.split_whitespace().collect();
        if !tokens.is_empty() {
            for i in 0..cues.len() {
                let window_end = (i + FUZZY_WINDOW).min(cues.len());
                let window: String = cues[i..window_end]
                    .iter()
                    .map(|c| c.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase();

                if tokens.iter().all(|token| token_matches(token, &window)) {
                    return Some(i);
                }
            }
        }
    }

    // Pass 3: loose substring for words
    if kind == QueryKind::Word {
        for (i, cue) in cues.iter().enumerate() {
            if cue.text.to_lowercase().contains(canonical) {
                return Some(i);
            }
        }
    }

    None
}
