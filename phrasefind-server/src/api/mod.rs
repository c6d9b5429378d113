//! HTTP surface
//!
//! Request validation, response shaping, and SSE framing. All endpoints
//! speak JSON except the streaming analysis.

pub mod analyze;
pub mod responses;
pub mod search;
pub mod words;

pub use responses::ApiError;
