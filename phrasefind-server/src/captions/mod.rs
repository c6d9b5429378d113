//! Timed-caption parsing and word extraction

pub mod parser;
pub mod words;

pub use parser::{merge_chunked, parse_webvtt, Cue};
pub use words::extract_words;
