//! Shared test doubles and builders for the integration suites
#![allow(dead_code)]

use async_trait::async_trait;
use phrasefind_common::config::ServiceConfig;
use phrasefind_common::{Error, Result};
use phrasefind_server::adapters::{
    AudioDownloader, ToolAdapters, Transcriber, TranscriptionOutcome, VideoCandidate, VideoCatalog,
};
use phrasefind_server::analysis::AnalysisParams;
use phrasefind_server::matching::phrase_appears_in_text;
use phrasefind_server::pipeline::JobContext;
use phrasefind_server::streams::AnalysisProvider;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Catalog double returning a scripted candidate list.
pub struct MockCatalog {
    pub candidates: Vec<VideoCandidate>,
    pub non_embeddable: HashSet<String>,
    pub searches: AtomicU32,
}

impl MockCatalog {
    pub fn with_videos(ids: &[&str]) -> Self {
        Self {
            candidates: ids
                .iter()
                .map(|id| VideoCandidate {
                    video_id: id.to_string(),
                    title: None,
                })
                .collect(),
            non_embeddable: HashSet::new(),
            searches: AtomicU32::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::with_videos(&[])
    }
}

#[async_trait]
impl VideoCatalog for MockCatalog {
    async fn search(&self, _query: &str, limit: u32) -> Result<Vec<VideoCandidate>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .candidates
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn is_embeddable(&self, video_id: &str) -> Result<bool> {
        Ok(!self.non_embeddable.contains(video_id))
    }
}

/// Downloader double writing a placeholder audio file.
pub struct MockDownloader;

#[async_trait]
impl AudioDownloader for MockDownloader {
    async fn download_audio(&self, video_id: &str, dest_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(format!("{}.mp3", video_id));
        tokio::fs::write(&path, b"not really audio").await?;
        Ok(path)
    }
}

/// Transcriber double producing scripted captions per video id.
pub struct MockTranscriber {
    /// video id -> WEBVTT content the "transcription" yields
    pub captions: HashMap<String, String>,
}

impl MockTranscriber {
    pub fn with_caption(video_id: &str, vtt: &str) -> Self {
        let mut captions = HashMap::new();
        captions.insert(video_id.to_string(), vtt.to_string());
        Self { captions }
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        phrase: &str,
        _chunk_seconds: u32,
        _max_chunks: u32,
    ) -> Result<TranscriptionOutcome> {
        let video_id = audio
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidInput("bad audio path".to_string()))?;
        let vtt = self.captions.get(video_id).cloned().unwrap_or_default();

        let caption_path = audio.with_extension("vtt");
        tokio::fs::write(&caption_path, &vtt).await?;

        let plain: String = phrasefind_server::captions::parse_webvtt(&vtt)
            .iter()
            .map(|c| c.text.clone())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(TranscriptionOutcome {
            caption_path,
            chunks_processed: 1,
            early_stopped: phrase_appears_in_text(phrase, &plain),
        })
    }
}

/// Analysis provider double streaming scripted chunks.
pub struct MockAnalysisProvider {
    pub chunks: Vec<String>,
    pub chunk_delay: Duration,
    pub calls: AtomicU32,
    pub fail_with: Option<String>,
}

impl MockAnalysisProvider {
    pub fn with_chunks(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            chunk_delay: Duration::from_millis(5),
            calls: AtomicU32::new(0),
            fail_with: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            chunks: Vec::new(),
            chunk_delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            fail_with: Some(message.to_string()),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for MockAnalysisProvider {
    async fn stream_analysis(
        &self,
        _params: &AnalysisParams,
        chunk_tx: mpsc::UnboundedSender<String>,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(Error::UpstreamUnavailable(message.clone()));
        }

        let mut accumulated = String::new();
        for chunk in &self.chunks {
            tokio::time::sleep(self.chunk_delay).await;
            accumulated.push_str(chunk);
            let _ = chunk_tx.send(chunk.clone());
        }
        Ok(accumulated)
    }

    async fn complete_analysis(&self, _params: &AnalysisParams) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(Error::UpstreamUnavailable(message.clone()));
        }
        Ok(self.chunks.concat())
    }
}

/// A model transcript whose JSON parses into the structured fields.
pub const ANALYSIS_JSON: &str = r#"{"fullTranslation":"The cat sleeps.","literalTranslation":"The cat it-sleeps.","grammarAnalysis":"Simple present.","breakdown":[{"word":"duerme","translation":"sleeps","partOfSpeech":"verb"}],"idioms":[]}"#;

/// Split a transcript into small streaming chunks for provider doubles.
pub fn json_chunks() -> Vec<String> {
    ANALYSIS_JSON
        .as_bytes()
        .chunks(24)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect()
}

pub fn analysis_params() -> AnalysisParams {
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

/// A config tuned for fast tests: quick polling, small windows.
pub fn fast_config() -> ServiceConfig {
    ServiceConfig {
        job_poll_interval_ms: 25,
        ..ServiceConfig::default()
    }
}

/// Job context over an in-memory database and the given doubles.
pub async fn job_context(
    db: &SqlitePool,
    catalog: MockCatalog,
    transcriber: MockTranscriber,
    temp_dir: PathBuf,
) -> JobContext {
    JobContext {
        db: db.clone(),
        adapters: ToolAdapters {
            catalog: Arc::new(catalog),
            downloader: Arc::new(MockDownloader),
            transcriber: Arc::new(transcriber),
        },
        config: fast_config(),
        temp_dir,
    }
}
