//! Phrase matching and sentence boundary detection

pub mod boundary;
pub mod matcher;
pub mod variations;

pub use boundary::{detect_sentence_bounds, SentenceBounds};
pub use matcher::{find_match, phrase_appears_in_text};
pub use variations::variations;
