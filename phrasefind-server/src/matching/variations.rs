//! Morphological variation sets
//!
//! Spoken English rarely matches a query token verbatim; the matcher
//! accepts a small set of derived forms, each treated as a prefix at a
//! word boundary.

use std::collections::BTreeSet;

/// Variation set for a single token.
///
/// Always contains the token itself and its plural; ending-specific rules
/// add stems and derived forms ("make" → "making", "creation" → "creat",
/// "connect" → "connection"/"connected"/"connecting"). Collapsed to a set.
pub fn variations(token: &str) -> BTreeSet<String> {
    let t = token.to_lowercase();
    let mut set = BTreeSet::new();
    set.insert(t.clone());
    set.insert(format!("{}s", t));

    if t.len() > 3 && t.ends_with("ion") {
        let stem = &t[..t.len() - 3];
        set.insert(stem.to_string());
        set.insert(format!("{}ing", stem));
    } else if t.len() > 2 && t.ends_with('e') {
        let stem = &t[..t.len() - 1];
        set.insert(format!("{}ing", stem));
        set.insert(format!("{}d", t));
    } else if t.len() > 2 && t.ends_with('t') {
        set.insert(format!("{}ion", t));
        set.insert(format!("{}ed", t));
        set.insert(format!("{}ing", t));
    } else if t.len() > 2 && t.ends_with('y') {
        let stem = &t[..t.len() - 1];
        set.insert(format!("{}ies", stem));
        set.insert(format!("{}ied", stem));
    }

    set
}
