//! Search strategy expansion
//!
//! Each query expands into a fixed ordered list of catalog search strings.
//! Strategies are queried in order until enough unique candidates are
//! collected.

use phrasefind_common::query::QueryKind;

/// Ordered search strategies for a canonical query.
pub fn search_strategies(canonical: &str, kind: QueryKind) -> Vec<String> {
    match kind {
        QueryKind::Word => vec![
            format!("\"{}\" explained", canonical),
            format!("{} explained", canonical),
            canonical.to_string(),
            format!("\"{}\"", canonical),
        ],
        QueryKind::Sentence => vec![
            format!("\"{}\"", canonical),
            canonical.to_string(),
            format!("{} example", canonical),
            format!("\"{}\" explained", canonical),
        ],
    }
}
