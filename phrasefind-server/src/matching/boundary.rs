//! Sentence boundary detection
//!
//! Expands a matched cue to the nearest sentence-ending punctuation on
//! both sides and produces the clip interval.

use crate::captions::Cue;

/// A detected sentence around a matched cue.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceBounds {
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub caption: String,
}

fn ends_sentence(text: &str) -> bool {
    matches!(text.trim().chars().last(), Some('.') | Some('!') | Some('?'))
}

/// Detect the sentence containing `match_index`.
///
/// Backward scan: the first earlier cue ending in `.!?` marks the previous
/// sentence; ours starts at the next cue (or 0 when none is found).
/// Forward scan: ends at the first cue (inclusive, starting from the
/// match) ending in `.!?`, or the last cue. `end_padding` seconds are
/// added past the final cue.
pub fn detect_sentence_bounds(cues: &[Cue], match_index: usize, end_padding: f64) -> SentenceBounds {
    assert!(match_index < cues.len(), "match index out of range");

    let mut start_index = 0;
    for i in (0..match_index).rev() {
        if ends_sentence(&cues[i].text) {
            start_index = i + 1;
            break;
        }
    }

    let mut end_index = cues.len() - 1;
    for (i, cue) in cues.iter().enumerate().skip(match_index) {
        if ends_sentence(&cue.text) {
            end_index = i;
            break;
        }
    }

    let caption = cues[start_index..=end_index]
        .iter()
        .map(|c| c.text.trim())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string();

    SentenceBounds {
        start_index,
        end_index,
        start_time: cues[start_index].start,
        end_time: cues[end_index].end() + end_padding,
        caption,
    }
}
