//! Sentence analysis parameters and transcript parsing

pub mod parse;

pub use parse::{parse_analysis, ParsedAnalysis};

use phrasefind_common::{analysis_fingerprint, Error, Result};
use serde::{Deserialize, Serialize};

/// Supported language codes: ISO 639-1 subset plus Chinese locale variants.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "ru", "ja", "ko", "zh", "zh-CN", "zh-TW", "ar", "hi",
    "th", "vi", "nl", "pl", "tr", "sv",
];

pub const MAX_SENTENCE_CHARS: usize = 1000;
pub const MAX_TARGET_WORD_CHARS: usize = 100;
pub const MAX_CONTEXT_CHARS: usize = 500;

/// Inputs of one sentence analysis. The fingerprint is derived from these
/// fields only; `video_timestamp` is display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisParams {
    pub sentence: String,
    pub target_word: String,
    pub target_language: String,
    pub native_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_timestamp: Option<f64>,
}

impl AnalysisParams {
    /// Validate field presence, length bounds, and language codes.
    pub fn validate(&self) -> Result<()> {
        if self.sentence.trim().is_empty() {
            return Err(Error::InvalidInput("sentence is required".to_string()));
        }
        if self.sentence.chars().count() > MAX_SENTENCE_CHARS {
            return Err(Error::InvalidInput(format!(
                "sentence exceeds {} characters",
                MAX_SENTENCE_CHARS
            )));
        }
        if self.target_word.trim().is_empty() {
            return Err(Error::InvalidInput("targetWord is required".to_string()));
        }
        if self.target_word.chars().count() > MAX_TARGET_WORD_CHARS {
            return Err(Error::InvalidInput(format!(
                "targetWord exceeds {} characters",
                MAX_TARGET_WORD_CHARS
            )));
        }
        for (name, context) in [
            ("contextBefore", &self.context_before),
            ("contextAfter", &self.context_after),
        ] {
            if let Some(context) = context {
                if context.chars().count() > MAX_CONTEXT_CHARS {
                    return Err(Error::InvalidInput(format!(
                        "{} exceeds {} characters",
                        name, MAX_CONTEXT_CHARS
                    )));
                }
            }
        }
        for (name, code) in [
            ("targetLanguage", &self.target_language),
            ("nativeLanguage", &self.native_language),
        ] {
            if !SUPPORTED_LANGUAGES.contains(&code.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "{} '{}' is not supported",
                    name, code
                )));
            }
        }
        Ok(())
    }

    /// Fingerprint over the canonical analysis tuple.
    pub fn fingerprint(&self) -> String {
        analysis_fingerprint(
            &self.sentence,
            &self.target_word,
            &self.target_language,
            &self.native_language,
            self.context_before.as_deref(),
            self.context_after.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AnalysisParams {
        AnalysisParams {
            sentence: "El gato duerme.".to_string(),
            target_word: "duerme".to_string(),
            target_language: "es".to_string(),
            native_language: "en".to_string(),
            context_before: None,
            context_after: None,
            video_timestamp: None,
        }
    }

    #[test]
    fn test_valid_params() {
        assert!(params().validate().is_ok());
    }

    #[test]
    fn test_empty_sentence_rejected() {
        let mut p = params();
        p.sentence = "   ".to_string();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_length_bounds() {
        let mut p = params();
        p.sentence = "x".repeat(1001);
        assert!(p.validate().is_err());

        let mut p = params();
        p.target_word = "x".repeat(101);
        assert!(p.validate().is_err());

        let mut p = params();
        p.context_before = Some("x".repeat(501));
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_unknown_language_rejected() {
        let mut p = params();
        p.target_language = "xx".to_string();
        assert!(p.validate().is_err());

        let mut p = params();
        p.native_language = "zh-HK".to_string();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_chinese_locale_variants_accepted() {
        let mut p = params();
        p.target_language = "zh-CN".to_string();
        assert!(p.validate().is_ok());
        p.target_language = "zh-TW".to_string();
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_fingerprint_ignores_video_timestamp() {
        let mut a = params();
        let mut b = params();
        a.video_timestamp = Some(12.5);
        b.video_timestamp = None;
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
