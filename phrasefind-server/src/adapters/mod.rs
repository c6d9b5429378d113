//! External tool adapters
//!
//! The pipeline consumes the video catalog, audio downloader, and
//! transcription engine through these narrow contracts. Production
//! implementations shell out to yt-dlp, ffmpeg, and Whisper; tests inject
//! in-process fakes.

pub mod ytdlp;
pub mod whisper;

use async_trait::async_trait;
use phrasefind_common::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use whisper::WhisperTranscriber;
pub use ytdlp::{YtDlpCatalog, YtDlpDownloader};

/// A video identifier emitted by the catalog for pipeline evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCandidate {
    pub video_id: String,
    pub title: Option<String>,
}

/// Result of a chunked transcription run.
#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    /// Merged timed-caption file covering all processed chunks.
    pub caption_path: PathBuf,
    pub chunks_processed: u32,
    /// Whether the phrase was spotted before the chunk cap.
    pub early_stopped: bool,
}

#[async_trait]
pub trait VideoCatalog: Send + Sync {
    /// Search the catalog, returning up to `limit` candidates.
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<VideoCandidate>>;

    /// Whether the video may be embedded in third-party players.
    async fn is_embeddable(&self, video_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait AudioDownloader: Send + Sync {
    /// Download the video's audio track into `dest_dir`, returning the
    /// audio file path.
    async fn download_audio(&self, video_id: &str, dest_dir: &Path) -> Result<PathBuf>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio` in fixed-length chunks, stopping early once the
    /// phrase (or a variation) appears, plus one spill-over chunk.
    async fn transcribe(
        &self,
        audio: &Path,
        phrase: &str,
        chunk_seconds: u32,
        max_chunks: u32,
    ) -> Result<TranscriptionOutcome>;
}

/// The adapter bundle handed to the pipeline.
#[derive(Clone)]
pub struct ToolAdapters {
    pub catalog: Arc<dyn VideoCatalog>,
    pub downloader: Arc<dyn AudioDownloader>,
    pub transcriber: Arc<dyn Transcriber>,
}
