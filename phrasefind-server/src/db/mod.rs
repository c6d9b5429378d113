//! Persistent stores
//!
//! All durable state is mutated only through the contracts in these
//! modules: the segment cache, the job queue, the word index, the analysis
//! cache, and the quota counters.

pub mod analyses;
pub mod jobs;
pub mod quota;
pub mod segments;
pub mod word_index;
