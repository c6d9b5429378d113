//! Deterministic fingerprints over canonical inputs
//!
//! A fingerprint is the SHA-256 hex digest of a delimited concatenation of
//! canonical strings. It is the primary key of both the segment cache and
//! the analysis cache.

use sha2::{Digest, Sha256};

/// Field delimiter inside the hashed tuple. The unit separator cannot
/// appear in trimmed user text, so distinct tuples never concatenate to the
/// same byte string.
const FIELD_DELIMITER: u8 = 0x1f;

fn digest_fields(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update([FIELD_DELIMITER]);
        }
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Fingerprint for a segment search, keyed by the canonical query alone.
pub fn search_fingerprint(canonical: &str) -> String {
    digest_fields(&[canonical])
}

/// Fingerprint for a sentence analysis.
///
/// Fields are hashed in fixed order: sentence, target word, target
/// language, native language, before-context, after-context. Each field is
/// trimmed and lowercased; missing contexts are empty strings.
pub fn analysis_fingerprint(
    sentence: &str,
    target_word: &str,
    target_language: &str,
    native_language: &str,
    context_before: Option<&str>,
    context_after: Option<&str>,
) -> String {
    let norm = |s: &str| s.trim().to_lowercase();
    let before = context_before.map(norm).unwrap_or_default();
    let after = context_after.map(norm).unwrap_or_default();
    digest_fields(&[
        &norm(sentence),
        &norm(target_word),
        &norm(target_language),
        &norm(native_language),
        &before,
        &after,
    ])
}
