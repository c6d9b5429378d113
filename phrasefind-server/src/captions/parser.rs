//! WEBVTT caption parser
//!
//! Parses the timed-caption files produced by the transcription tool into
//! an ordered cue list, and stitches per-chunk transcriptions together by
//! shifting each chunk's cues by its offset.

use once_cell::sync::Lazy;
use regex::Regex;

/// One timed caption cue.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub text: String,
    /// Start time in seconds.
    pub start: f64,
    /// Duration in seconds (never negative).
    pub duration: f64,
}

impl Cue {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Timing line: `HH:MM:SS.mmm --> HH:MM:SS.mmm` or `MM:SS.mmm --> MM:SS.mmm`.
static TIMING_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*((?:\d{1,2}:)?\d{1,2}:\d{2}\.\d{3})\s*-->\s*((?:\d{1,2}:)?\d{1,2}:\d{2}\.\d{3})")
        .expect("timing regex is valid")
});

/// Inline markup such as `<c>` spans and `<00:00:01.000>` word timings.
static INLINE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex is valid"));

/// Parse WEBVTT text into an ordered cue list.
///
/// Lines preceding the `WEBVTT` header, blank lines, and `NOTE` blocks are
/// ignored. Multi-line cue text is joined with single spaces; cues whose
/// text is empty after cleanup are dropped.
pub fn parse_webvtt(content: &str) -> Vec<Cue> {
    let mut cues = Vec::new();

    // Skip everything up to and including the WEBVTT header line. Files
    // without a header are parsed from the top.
    let header_line = content
        .lines()
        .position(|line| line.trim_start().starts_with("WEBVTT"));
    let mut lines = content
        .lines()
        .skip(header_line.map(|i| i + 1).unwrap_or(0))
        .peekable();

    let mut in_note = false;
    while let Some(line) = lines.next() {
        let trimmed = line.trim();

        if in_note {
            if trimmed.is_empty() {
                in_note = false;
            }
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("NOTE") {
            in_note = true;
            continue;
        }

        let Some(caps) = TIMING_LINE.captures(trimmed) else {
            // Cue identifier or stray metadata line; the timing line (if
            // any) follows and is handled on its own iteration.
            continue;
        };

        let Some(start) = parse_timestamp(&caps[1]) else {
            continue;
        };
        let Some(end) = parse_timestamp(&caps[2]) else {
            continue;
        };

        // Collect text lines until the next blank line
        let mut text_parts: Vec<String> = Vec::new();
        while let Some(&next) = lines.peek() {
            let next_trimmed = next.trim();
            if next_trimmed.is_empty() {
                break;
            }
            if TIMING_LINE.is_match(next_trimmed) {
                break;
            }
            lines.next();
            let cleaned = INLINE_TAG.replace_all(next_trimmed, "");
            let cleaned = cleaned.trim();
            if !cleaned.is_empty() {
                text_parts.push(cleaned.to_string());
            }
        }

        let text = text_parts.join(" ");
        if text.is_empty() {
            continue;
        }

        cues.push(Cue {
            text,
            start,
            duration: (end - start).max(0.0),
        });
    }

    cues
}

/// Parse `HH:MM:SS.mmm` or `MM:SS.mmm` into seconds.
fn parse_timestamp(ts: &str) -> Option<f64> {
    let (rest, millis) = ts.split_once('.')?;
    let millis: f64 = millis.parse::<u32>().ok()? as f64 / 1000.0;

    let parts: Vec<&str> = rest.split(':').collect();
    let seconds = match parts.as_slice() {
        [h, m, s] => {
            h.parse::<u32>().ok()? as f64 * 3600.0
                + m.parse::<u32>().ok()? as f64 * 60.0
                + s.parse::<u32>().ok()? as f64
        }
        [m, s] => m.parse::<u32>().ok()? as f64 * 60.0 + s.parse::<u32>().ok()? as f64,
        _ => return None,
    };

    Some(seconds + millis)
}

/// Stitch per-chunk cue lists into one timeline.
///
/// Chunk `i` was transcribed from audio starting at `i * chunk_seconds`,
/// so its cues shift by that offset before concatenation.
pub fn merge_chunked(chunks: &[Vec<Cue>], chunk_seconds: u32) -> Vec<Cue> {
    let mut merged = Vec::new();
    for (index, chunk) in chunks.iter().enumerate() {
        let offset = index as f64 * chunk_seconds as f64;
        for cue in chunk {
            merged.push(Cue {
                text: cue.text.clone(),
                start: cue.start + offset,
                duration: cue.duration,
            });
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
WEBVTT

00:00.000 --> 00:02.500
Hello world.

00:02.500 --> 00:05.000
This is a test.
";

    #[test]
    fn test_basic_parse() {
        let cues = parse_webvtt(SAMPLE);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "Hello world.");
        assert!((cues[0].start - 0.0).abs() < 1e-9);
        assert!((cues[0].duration - 2.5).abs() < 1e-9);
        assert!((cues[1].start - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_hours_timestamps() {
        let content = "WEBVTT\n\n01:02:03.500 --> 01:02:04.000\nLate cue.\n";
        let cues = parse_webvtt(content);
        assert_eq!(cues.len(), 1);
        assert!((cues[0].start - 3723.5).abs() < 1e-9);
        assert!((cues[0].duration - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_preamble_and_notes_ignored() {
        let content = "\
Kind: captions
Language: en
WEBVTT

NOTE This block is
ignored entirely

00:01.000 --> 00:02.000
Real text.
";
        let cues = parse_webvtt(content);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "Real text.");
    }

    #[test]
    fn test_multiline_text_joined() {
        let content = "WEBVTT\n\n00:01.000 --> 00:04.000\nFirst line\nsecond line\n";
        let cues = parse_webvtt(content);
        assert_eq!(cues[0].text, "First line second line");
    }

    #[test]
    fn test_empty_cues_dropped() {
        let content = "WEBVTT\n\n00:01.000 --> 00:02.000\n\n00:02.000 --> 00:03.000\nKept.\n";
        let cues = parse_webvtt(content);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "Kept.");
    }

    #[test]
    fn test_cue_identifiers_skipped() {
        let content = "WEBVTT\n\n1\n00:01.000 --> 00:02.000\nWith id.\n";
        let cues = parse_webvtt(content);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "With id.");
    }

    #[test]
    fn test_inline_tags_stripped() {
        let content = "WEBVTT\n\n00:01.000 --> 00:02.000\n<c>Styled</c> <00:00:01.500>text\n";
        let cues = parse_webvtt(content);
        assert_eq!(cues[0].text, "Styled text");
    }

    #[test]
    fn test_merge_chunked_offsets() {
        let chunk0 = vec![Cue {
            text: "a".to_string(),
            start: 1.0,
            duration: 2.0,
        }];
        let chunk1 = vec![Cue {
            text: "b".to_string(),
            start: 0.5,
            duration: 1.0,
        }];
        let merged = merge_chunked(&[chunk0, chunk1], 30);
        assert_eq!(merged.len(), 2);
        assert!((merged[0].start - 1.0).abs() < 1e-9);
        assert!((merged[1].start - 30.5).abs() < 1e-9);
    }
}
