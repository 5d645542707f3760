use anyhow::Context;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use super::youtube::VideoMetadata;
use crate::Result;

/// Subtitle formats we know how to flatten, in order of preference
const SUBTITLE_EXTENSIONS: &[&str] = &["vtt", "srt"];

/// Thin wrapper around the yt-dlp command-line tool
#[derive(Debug, Clone)]
pub struct YtDlp {
    yt_dlp_path: String,
}

impl YtDlp {
    pub fn new(yt_dlp_path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
        }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Run yt-dlp with a deadline; the child is killed when the deadline passes
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output> {
        tracing::debug!("Running {} {}", self.yt_dlp_path, args.join(" "));

        let child = Command::new(&self.yt_dlp_path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| anyhow::anyhow!("yt-dlp timed out after {}s", timeout.as_secs()))?
            .with_context(|| format!("Failed to run {}", self.yt_dlp_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp failed: {}", last_error_line(&error));
        }

        Ok(output)
    }

    /// Get title and duration using `--dump-json`
    pub async fn video_info(&self, url: &str, timeout: Duration) -> Result<VideoMetadata> {
        let output = self
            .run(&["--dump-json", "--no-playlist", "--no-warnings", url], timeout)
            .await?;

        let info: Value = serde_json::from_slice(&output.stdout)
            .context("yt-dlp returned invalid JSON")?;

        Ok(VideoMetadata {
            title: info["title"].as_str().map(|s| s.to_string()),
            duration_seconds: info["duration"].as_f64().map(|d| d.round() as u64),
        })
    }

    /// Fetch manual or auto-generated subtitles without downloading media
    pub async fn download_subtitles(
        &self,
        url: &str,
        dir: &Path,
        languages: &[String],
        timeout: Duration,
    ) -> Result<PathBuf> {
        let template = dir.join("%(id)s.%(ext)s");
        let template = template.to_string_lossy();
        let langs = languages.join(",");

        self.run(
            &[
                "--skip-download",
                "--write-sub",
                "--write-auto-sub",
                "--sub-lang", &langs,
                "--sub-format", "vtt/srt/best",
                "--no-playlist",
                "--no-warnings",
                "--output", &template,
                url,
            ],
            timeout,
        )
        .await?;

        find_subtitle_file(dir)?
            .ok_or_else(|| anyhow::anyhow!("no subtitles available"))
    }

    /// Extract the audio stream as MP3, refusing anything over `max_bytes`
    pub async fn extract_audio(
        &self,
        url: &str,
        dir: &Path,
        max_bytes: u64,
        timeout: Duration,
    ) -> Result<PathBuf> {
        let template = dir.join("audio.%(ext)s");
        let template = template.to_string_lossy();
        let max_filesize = max_bytes.to_string();

        self.run(
            &[
                "--output", &template,
                "--extract-audio",
                "--audio-format", "mp3",
                // Lowest quality is still fine for speech and keeps files small
                "--audio-quality", "9",
                "--format", "worstaudio[acodec^=mp4a]/worstaudio[ext=m4a]/worstaudio[ext=mp3]/worstaudio",
                "--max-filesize", &max_filesize,
                "--no-playlist",
                "--no-warnings",
                url,
            ],
            timeout,
        )
        .await?;

        let audio_path = dir.join("audio.mp3");
        if !audio_path.exists() {
            // yt-dlp exits 0 but skips the download when --max-filesize trips
            anyhow::bail!("audio exceeds {} or could not be extracted", crate::utils::format_file_size(max_bytes));
        }

        let size = fs_err::metadata(&audio_path)?.len();
        if size > max_bytes {
            anyhow::bail!(
                "extracted audio is {} (limit {})",
                crate::utils::format_file_size(size),
                crate::utils::format_file_size(max_bytes)
            );
        }

        Ok(audio_path)
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

/// First subtitle file in `dir`, English tracks first
fn find_subtitle_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut candidates: Vec<PathBuf> = fs_err::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SUBTITLE_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
        .collect();

    candidates.sort_by_key(|path| {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let format_rank = SUBTITLE_EXTENSIONS
            .iter()
            .position(|ext| name.ends_with(ext))
            .unwrap_or(SUBTITLE_EXTENSIONS.len());
        (!name.contains(".en"), format_rank, name)
    });

    Ok(candidates.into_iter().next())
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("unknown error")
        .trim()
        .to_string()
}

/// A stand-in `yt-dlp` shell script. It fills the `--output` template with id `fake` and
/// the given extension and writes `content` there, or exits 0 without writing when `output`
/// is `None` (what the real tool does when `--max-filesize` trips).
#[cfg(all(test, unix))]
pub(crate) fn fake_yt_dlp(dir: &Path, output: Option<(&str, &str)>) -> YtDlp {
    use std::os::unix::fs::PermissionsExt;

    let write = match output {
        Some((ext, content)) => {
            let payload = dir.join(format!("payload.{}", ext));
            fs_err::write(&payload, content).unwrap();
            format!(
                "target=$(printf '%s' \"$out\" | sed -e 's/%(id)s/fake/' -e 's/%(ext)s/{}/')\n\
                 cat '{}' > \"$target\"\n",
                ext,
                payload.display()
            )
        }
        None => String::new(),
    };

    let script = dir.join("yt-dlp");
    fs_err::write(
        &script,
        format!(
            "#!/bin/sh\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  \
             if [ \"$1\" = \"--output\" ]; then out=\"$2\"; shift; fi\n  shift\ndone\n{}exit 0\n",
            write
        ),
    )
    .unwrap();
    fs_err::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    YtDlp::new(script.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_subtitle_file_prefers_english_vtt() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["abc.de.vtt", "abc.en.srt", "abc.en.vtt", "abc.info.json"] {
            fs_err::write(dir.path().join(name), "x").unwrap();
        }

        let found = find_subtitle_file(dir.path()).unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "abc.en.vtt");
    }

    #[test]
    fn test_find_subtitle_file_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_subtitle_file(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_last_error_line() {
        let stderr = "WARNING: something\nERROR: [youtube] abc: Video unavailable\n\n";
        assert_eq!(last_error_line(stderr), "ERROR: [youtube] abc: Video unavailable");
        assert_eq!(last_error_line(""), "unknown error");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let ytdlp = YtDlp::new("definitely-not-a-real-yt-dlp-binary");
        assert!(!ytdlp.check_availability().await);

        let dir = tempfile::tempdir().unwrap();
        let result = ytdlp
            .download_subtitles("https://youtu.be/dQw4w9WgXcQ", dir.path(), &["en".to_string()], Duration::from_secs(5))
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extract_audio_returns_downloaded_file() {
        let bin = tempfile::tempdir().unwrap();
        let ytdlp = fake_yt_dlp(bin.path(), Some(("mp3", "ID3 fake audio")));

        let dir = tempfile::tempdir().unwrap();
        let path = ytdlp
            .extract_audio("https://youtu.be/dQw4w9WgXcQ", dir.path(), 1024, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("audio.mp3"));
        assert_eq!(fs_err::read_to_string(&path).unwrap(), "ID3 fake audio");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_skipped_download_reports_size_cap() {
        let bin = tempfile::tempdir().unwrap();
        let ytdlp = fake_yt_dlp(bin.path(), None);

        let dir = tempfile::tempdir().unwrap();
        let err = ytdlp
            .extract_audio("https://youtu.be/dQw4w9WgXcQ", dir.path(), 1024, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("audio exceeds"), "{}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_oversized_download_is_rejected() {
        let bin = tempfile::tempdir().unwrap();
        let ytdlp = fake_yt_dlp(bin.path(), Some(("mp3", "0123456789")));

        let dir = tempfile::tempdir().unwrap();
        let err = ytdlp
            .extract_audio("https://youtu.be/dQw4w9WgXcQ", dir.path(), 4, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("extracted audio is"), "{}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_subtitles_finds_written_track() {
        let bin = tempfile::tempdir().unwrap();
        let ytdlp = fake_yt_dlp(bin.path(), Some(("en.vtt", "WEBVTT\n\n00:01.000 --> 00:02.000\nhello\n")));

        let dir = tempfile::tempdir().unwrap();
        let path = ytdlp
            .download_subtitles("https://youtu.be/dQw4w9WgXcQ", dir.path(), &["en".to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "fake.en.vtt");
    }
}
