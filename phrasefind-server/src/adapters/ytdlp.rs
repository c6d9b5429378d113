//! yt-dlp backed catalog and downloader

use super::{AudioDownloader, VideoCandidate, VideoCatalog};
use async_trait::async_trait;
use phrasefind_common::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Video catalog backed by yt-dlp's search extractor.
#[derive(Debug, Default, Clone)]
pub struct YtDlpCatalog;

#[async_trait]
impl VideoCatalog for YtDlpCatalog {
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<VideoCandidate>> {
        let output = Command::new("yt-dlp")
            .arg(format!("ytsearch{}:{}", limit, query))
            .arg("--flat-playlist")
            .arg("--no-warnings")
            .arg("--print")
            .arg("%(id)s\t%(title)s")
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "yt-dlp search failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let candidates: Vec<VideoCandidate> = stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(2, '\t');
                let id = parts.next()?.trim();
                if id.is_empty() {
                    return None;
                }
                Some(VideoCandidate {
                    video_id: id.to_string(),
                    title: parts.next().map(|t| t.trim().to_string()),
                })
            })
            .collect();

        debug!(query, count = candidates.len(), "Catalog search returned");
        Ok(candidates)
    }

    async fn is_embeddable(&self, video_id: &str) -> Result<bool> {
        let output = Command::new("yt-dlp")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--print")
            .arg("%(playable_in_embed)s")
            .arg("--")
            .arg(watch_url(video_id))
            .output()
            .await?;

        if !output.status.success() {
            warn!(
                video_id,
                "Embeddability probe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            return Ok(false);
        }

        let answer = String::from_utf8_lossy(&output.stdout);
        Ok(answer.trim().eq_ignore_ascii_case("true"))
    }
}

/// Audio downloader backed by yt-dlp's audio extraction.
#[derive(Debug, Default, Clone)]
pub struct YtDlpDownloader;

#[async_trait]
impl AudioDownloader for YtDlpDownloader {
    async fn download_audio(&self, video_id: &str, dest_dir: &Path) -> Result<PathBuf> {
        let dest = dest_dir.join(format!("{}.mp3", video_id));

        let output = Command::new("yt-dlp")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("-x")
            .arg("--audio-format")
            .arg("mp3")
            .arg("-o")
            .arg(&dest)
            .arg("--")
            .arg(watch_url(video_id))
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "yt-dlp audio download failed for {}: {}",
                video_id,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        if !dest.exists() {
            return Err(Error::Internal(format!(
                "yt-dlp reported success but {} is missing",
                dest.display()
            )));
        }

        Ok(dest)
    }
}
