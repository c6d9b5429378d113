//! Upstream AI provider
//!
//! Contract plus the production client for an OpenAI-compatible chat
//! completions endpoint. Streaming responses arrive as SSE `data:` lines
//! carrying deltas; the client forwards each delta and returns the
//! accumulated text.

use crate::analysis::AnalysisParams;
use async_trait::async_trait;
use futures::StreamExt;
use phrasefind_common::{Error, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Hard timeout for one upstream call.
const UPSTREAM_TIMEOUT_SECS: u64 = 600;
/// Retries on transient upstream conditions, with 1 s / 2 s / 4 s backoff.
const UPSTREAM_MAX_RETRIES: u32 = 3;

#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Stream an analysis, forwarding each incremental chunk through
    /// `chunk_tx`. Returns the full accumulated text.
    async fn stream_analysis(
        &self,
        params: &AnalysisParams,
        chunk_tx: mpsc::UnboundedSender<String>,
    ) -> Result<String>;

    /// Run an analysis without streaming; returns the full text.
    async fn complete_analysis(&self, params: &AnalysisParams) -> Result<String>;
}

/// Client for an OpenAI-compatible chat completions API.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatProvider {
    pub fn new(api_url: String, model: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url,
            model,
            api_key,
        })
    }

    /// Construct from environment, with OpenAI defaults.
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("PHRASEFIND_AI_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let model =
            std::env::var("PHRASEFIND_AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY is not set".to_string()))?;

        Self::new(api_url, model, api_key)
    }

    fn request_body(&self, params: &AnalysisParams, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "stream": stream,
            "temperature": 0.3,
            "messages": [
                { "role": "system", "content": system_prompt(params) },
                { "role": "user", "content": user_prompt(params) },
            ],
        })
    }

    async fn send_request(
        &self,
        params: &AnalysisParams,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(params, stream))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamAuth(format!(
                "provider rejected request ({}): {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamUnavailable(format!(
                "provider returned {}: {}",
                status, body
            )));
        }

        Ok(response)
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> Error {
    Error::UpstreamUnavailable(format!("provider request failed: {}", e))
}

/// Whether an error is retryable (rate limit, 5xx, timeout — never 400/401).
fn is_transient(err: &Error) -> bool {
    matches!(err, Error::UpstreamUnavailable(_))
}

async fn backoff(attempt: u32) {
    // 1 s, 2 s, 4 s
    let secs = 1u64 << attempt.min(2);
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[async_trait]
impl AnalysisProvider for OpenAiCompatProvider {
    async fn stream_analysis(
        &self,
        params: &AnalysisParams,
        chunk_tx: mpsc::UnboundedSender<String>,
    ) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.stream_once(params, &chunk_tx).await {
                Ok(full) => return Ok(full),
                Err((err, emitted)) => {
                    // Once chunks have reached subscribers a retry would
                    // duplicate output; surface the error instead.
                    if emitted || !is_transient(&err) || attempt >= UPSTREAM_MAX_RETRIES {
                        return Err(err);
                    }
                    warn!(attempt, error = %err, "Transient provider error, retrying stream");
                    backoff(attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn complete_analysis(&self, params: &AnalysisParams) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            let result = async {
                let response = self.send_request(params, false).await?;
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(classify_reqwest_error)?;
                body["choices"][0]["message"]["content"]
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| {
                        Error::UpstreamUnavailable(format!(
                            "provider response missing content: {}",
                            body
                        ))
                    })
            }
            .await;

            match result {
                Ok(content) => return Ok(content),
                Err(err) => {
                    if !is_transient(&err) || attempt >= UPSTREAM_MAX_RETRIES {
                        return Err(err);
                    }
                    warn!(attempt, error = %err, "Transient provider error, retrying");
                    backoff(attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl OpenAiCompatProvider {
    /// One streaming attempt. The error side carries whether any chunk was
    /// already emitted (emitted output forbids a retry).
    async fn stream_once(
        &self,
        params: &AnalysisParams,
        chunk_tx: &mpsc::UnboundedSender<String>,
    ) -> std::result::Result<String, (Error, bool)> {
        let response = self
            .send_request(params, true)
            .await
            .map_err(|e| (e, false))?;

        let mut accumulated = String::new();
        let mut emitted = false;
        let mut buffer = String::new();
        let mut byte_stream = response.bytes_stream();

        while let Some(piece) = byte_stream.next().await {
            let piece = piece.map_err(|e| (classify_reqwest_error(e), emitted))?;
            buffer.push_str(&String::from_utf8_lossy(&piece));

            // Process complete lines; keep the trailing partial line buffered
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data.trim() == "[DONE]" {
                    debug!("Provider stream finished");
                    return Ok(accumulated);
                }
                let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) else {
                    continue;
                };
                if let Some(delta) = parsed["choices"][0]["delta"]["content"].as_str() {
                    if !delta.is_empty() {
                        accumulated.push_str(delta);
                        emitted = true;
                        // Receiver gone means every subscriber left; keep
                        // accumulating so the result still persists.
                        let _ = chunk_tx.send(delta.to_string());
                    }
                }
            }
        }

        Ok(accumulated)
    }
}

fn system_prompt(params: &AnalysisParams) -> String {
    format!(
        r#"You are a language tutor analyzing sentences for learners. Respond in {native}.

You MUST output ONLY valid JSON matching this exact structure (no markdown, no explanation):
{{
  "fullTranslation": "Natural translation of the sentence",
  "literalTranslation": "Word-order-preserving literal translation",
  "grammarAnalysis": "2-4 sentences on the grammar at work",
  "breakdown": [
    {{"word": "token", "translation": "meaning", "partOfSpeech": "noun|verb|...", "notes": "optional"}}
  ],
  "idioms": [
    {{"phrase": "fixed expression", "meaning": "what it means", "literal": "optional literal reading"}}
  ],
  "difficultyNotes": "Optional notes on what makes this sentence hard"
}}

Rules:
- Break down every content word, with special attention to "{target}"
- Only list genuine idioms or fixed expressions; an empty list is fine
- Output ONLY the JSON, nothing else"#,
        native = params.native_language,
        target = params.target_word,
    )
}

fn user_prompt(params: &AnalysisParams) -> String {
    let mut prompt = format!(
        "Analyze this {} sentence for a {} speaker, focusing on the word \"{}\":\n\n{}",
        params.target_language, params.native_language, params.target_word, params.sentence
    );
    if let Some(before) = &params.context_before {
        prompt.push_str(&format!("\n\nPreceding context: {}", before));
    }
    if let Some(after) = &params.context_after {
        prompt.push_str(&format!("\n\nFollowing context: {}", after));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&Error::UpstreamUnavailable("503".to_string())));
        assert!(!is_transient(&Error::UpstreamAuth("401".to_string())));
        assert!(!is_transient(&Error::InvalidInput("bad".to_string())));
    }

    #[test]
    fn test_prompts_carry_context() {
        let params = AnalysisParams {
            sentence: "El gato duerme.".to_string(),
            target_word: "duerme".to_string(),
            target_language: "es".to_string(),
            native_language: "en".to_string(),
            context_before: Some("Mira al gato.".to_string()),
            context_after: None,
            video_timestamp: None,
        };
        let prompt = user_prompt(&params);
        assert!(prompt.contains("El gato duerme."));
        assert!(prompt.contains("Preceding context: Mira al gato."));
        assert!(!prompt.contains("Following context"));
        assert!(system_prompt(&params).contains("\"duerme\""));
    }
}
