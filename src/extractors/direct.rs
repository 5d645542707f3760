use anyhow::Context;
use futures_util::StreamExt;
use reqwest::Client;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use super::AudioFormat;
use crate::Result;

/// Audio fetched from a direct media URL
#[derive(Debug, Clone)]
pub struct DownloadedAudio {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub size: u64,
    pub title: Option<String>,
}

/// Downloader for URLs that point straight at an audio or video file
pub struct DirectDownloader {
    client: Client,
}

impl DirectDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Determine audio format from URL or content type
    fn determine_format(url: &str, content_type: Option<&str>) -> AudioFormat {
        if let Ok(parsed_url) = Url::parse(url) {
            if let Some(filename) = parsed_url.path_segments().and_then(|mut s| s.next_back()) {
                if let Some(format) = AudioFormat::from_path(Path::new(filename)) {
                    return format;
                }
            }
        }

        if let Some(content_type) = content_type {
            match content_type {
                ct if ct.contains("mp3") || ct.contains("mpeg") => return AudioFormat::Mp3,
                ct if ct.contains("m4a") || ct.contains("audio/mp4") || ct.contains("aac") => return AudioFormat::M4a,
                ct if ct.contains("video/mp4") => return AudioFormat::Mp4,
                ct if ct.contains("wav") => return AudioFormat::Wav,
                ct if ct.contains("flac") => return AudioFormat::Flac,
                ct if ct.contains("ogg") || ct.contains("opus") => return AudioFormat::Ogg,
                ct if ct.contains("webm") => return AudioFormat::Webm,
                _ => {}
            }
        }

        AudioFormat::Mp3
    }

    /// Human-readable title from the file name
    pub fn title_from_url(url: &str) -> Option<String> {
        let parsed_url = Url::parse(url).ok()?;
        parsed_url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|filename| !filename.is_empty())
            .map(|filename| {
                let name = match filename.rfind('.') {
                    Some(dot_pos) if dot_pos > 0 => &filename[..dot_pos],
                    _ => filename,
                };
                urlencoding::decode(name)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| name.to_string())
                    .replace(['_', '-'], " ")
                    .trim()
                    .to_string()
            })
            .filter(|title| !title.is_empty())
    }

    /// Stream the file into `dir`, aborting once it grows past `max_bytes`
    pub async fn download(&self, url: &str, dir: &Path, max_bytes: u64, timeout: Duration) -> Result<DownloadedAudio> {
        tracing::info!("Downloading audio from {}", url);

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .context("Failed to request audio")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download audio: HTTP {}", response.status());
        }

        if let Some(length) = response.content_length() {
            if length > max_bytes {
                anyhow::bail!(
                    "audio is {} (limit {})",
                    crate::utils::format_file_size(length),
                    crate::utils::format_file_size(max_bytes)
                );
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(|s| s.to_string());
        let format = Self::determine_format(url, content_type.as_deref());

        let path = dir.join(format!("download.{}", format.as_str()));
        let mut file = fs_err::File::create(&path)?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Audio download interrupted")?;
            downloaded += chunk.len() as u64;
            if downloaded > max_bytes {
                anyhow::bail!("audio exceeds {}", crate::utils::format_file_size(max_bytes));
            }
            file.write_all(&chunk)?;
        }
        file.flush()?;

        if downloaded == 0 {
            anyhow::bail!("downloaded audio is empty");
        }

        tracing::debug!("Downloaded {}", crate::utils::format_file_size(downloaded));

        Ok(DownloadedAudio {
            path,
            format,
            size: downloaded,
            title: Self::title_from_url(url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_format() {
        assert_eq!(DirectDownloader::determine_format("https://x.com/a.flac", None), AudioFormat::Flac);
        assert_eq!(DirectDownloader::determine_format("https://x.com/stream", Some("audio/ogg")), AudioFormat::Ogg);
        assert_eq!(DirectDownloader::determine_format("https://x.com/stream", Some("audio/mp4")), AudioFormat::M4a);
        assert_eq!(DirectDownloader::determine_format("https://x.com/stream", None), AudioFormat::Mp3);
    }

    #[test]
    fn test_title_from_url() {
        assert_eq!(
            DirectDownloader::title_from_url("https://cdn.example.com/shows/my_great-episode%2042.mp3?x=1"),
            Some("my great episode 42".to_string())
        );
        assert_eq!(DirectDownloader::title_from_url("https://cdn.example.com/"), None);
        assert_eq!(DirectDownloader::title_from_url("not a url"), None);
    }
}
