//! Chunked Whisper transcription
//!
//! Splits the audio into fixed-length chunks with ffmpeg and transcribes
//! them one at a time, inspecting the caption text after each chunk. Once
//! the phrase (or a variation) appears, one additional chunk is processed
//! to catch a sentence spilling across the boundary, then transcription
//! stops. The per-chunk captions are merged into a single timeline.

use super::{Transcriber, TranscriptionOutcome};
use crate::captions::{merge_chunked, parse_webvtt, Cue};
use crate::matching::phrase_appears_in_text;
use async_trait::async_trait;
use phrasefind_common::{Error, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Chunks smaller than this are treated as "ran past the end of audio".
const MIN_CHUNK_BYTES: u64 = 1024;

#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    /// Whisper model name (`tiny`, `base`, ...).
    pub model: String,
}

impl Default for WhisperTranscriber {
    fn default() -> Self {
        Self {
            model: "base".to_string(),
        }
    }
}

impl WhisperTranscriber {
    async fn extract_chunk(
        &self,
        audio: &Path,
        chunk_index: u32,
        chunk_seconds: u32,
        chunk_path: &Path,
    ) -> Result<bool> {
        let offset = chunk_index * chunk_seconds;
        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(audio)
            .arg("-ss")
            .arg(offset.to_string())
            .arg("-t")
            .arg(chunk_seconds.to_string())
            .arg("-vn")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("-ar")
            .arg("16000")
            .arg("-ac")
            .arg("1")
            .arg(chunk_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "ffmpeg chunk extraction failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        // A seek past the end produces an empty or near-empty file
        let size = tokio::fs::metadata(chunk_path).await.map(|m| m.len()).unwrap_or(0);
        Ok(size >= MIN_CHUNK_BYTES)
    }

    async fn transcribe_chunk(&self, chunk_path: &Path) -> Result<Vec<Cue>> {
        let output_dir = chunk_path.parent().unwrap_or(Path::new("."));

        let output = Command::new("whisper")
            .arg(chunk_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--language")
            .arg("en")
            .arg("--output_format")
            .arg("vtt")
            .arg("--output_dir")
            .arg(output_dir)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "whisper transcription failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        // Whisper names its output after the input stem
        let vtt_path = chunk_path.with_extension("vtt");
        let content = tokio::fs::read_to_string(&vtt_path).await?;
        Ok(parse_webvtt(&content))
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        phrase: &str,
        chunk_seconds: u32,
        max_chunks: u32,
    ) -> Result<TranscriptionOutcome> {
        let stem = audio
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("Bad audio path: {}", audio.display())))?;
        let dir = audio.parent().unwrap_or(Path::new(".")).to_path_buf();

        let mut chunk_cues: Vec<Vec<Cue>> = Vec::new();
        let mut matched_at: Option<u32> = None;

        for chunk_index in 0..max_chunks {
            let chunk_path = dir.join(format!("{}.chunk{}.wav", stem, chunk_index));

            if !self
                .extract_chunk(audio, chunk_index, chunk_seconds, &chunk_path)
                .await?
            {
                debug!(chunk_index, "Audio exhausted before chunk cap");
                break;
            }

            let cues = self.transcribe_chunk(&chunk_path).await?;
            let chunk_text: String = cues
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            chunk_cues.push(cues);

            match matched_at {
                // One spill-over chunk after the hit, then stop
                Some(_) => break,
                None => {
                    if phrase_appears_in_text(phrase, &chunk_text) {
                        info!(chunk_index, "Phrase spotted, transcribing one more chunk");
                        matched_at = Some(chunk_index);
                    }
                }
            }
        }

        let chunks_processed = chunk_cues.len() as u32;
        let merged = merge_chunked(&chunk_cues, chunk_seconds);
        let caption_path = dir.join(format!("{}.vtt", stem));
        tokio::fs::write(&caption_path, render_vtt(&merged)).await?;

        Ok(TranscriptionOutcome {
            caption_path,
            chunks_processed,
            early_stopped: matched_at.is_some(),
        })
    }
}

/// Render cues back into WEBVTT text for the merged caption file.
fn render_vtt(cues: &[Cue]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for cue in cues {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_timestamp(cue.start),
            format_timestamp(cue.end()),
            cue.text
        ));
    }
    out
}

fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let h = total_ms / 3_600_000;
    let m = (total_ms % 3_600_000) / 60_000;
    let s = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", h, m, s, ms)
}
