use async_trait::async_trait;
use std::time::Duration;

use super::{Transcript, TranscriptStrategy};
use crate::extractors::{canonical_url, ytdlp::YtDlp};
use crate::Result;

/// Tier 2: manual or auto-generated subtitles fetched by yt-dlp
pub struct SubtitleExtractor {
    ytdlp: YtDlp,
    languages: Vec<String>,
    timeout: Duration,
}

impl SubtitleExtractor {
    pub fn new(ytdlp: YtDlp, languages: Vec<String>, timeout: Duration) -> Self {
        Self {
            ytdlp,
            languages,
            timeout,
        }
    }
}

#[async_trait]
impl TranscriptStrategy for SubtitleExtractor {
    async fn attempt(&self, video_id: &str) -> Result<Transcript> {
        let temp_dir = tempfile::tempdir()?;
        let url = canonical_url(video_id);

        let path = self
            .ytdlp
            .download_subtitles(&url, temp_dir.path(), &self.languages, self.timeout)
            .await?;

        tracing::debug!("Parsing subtitle file {}", path.display());
        let raw = fs_err::read_to_string(&path)?;

        Ok(Transcript::free(subtitles_to_text(&raw), self.name()))
    }

    fn name(&self) -> &'static str {
        "yt-dlp-subtitles"
    }
}

/// Flatten a WebVTT or SRT file into a single paragraph of spoken text.
///
/// Auto-generated tracks repeat each line as it scrolls, so consecutive duplicates collapse.
pub fn subtitles_to_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_block = false;

    for line in raw.lines() {
        let line = line.trim();

        if line.is_empty() {
            in_block = false;
            continue;
        }

        if line.starts_with("WEBVTT")
            || line.starts_with("Kind:")
            || line.starts_with("Language:")
        {
            continue;
        }

        // NOTE and STYLE blocks run until the next blank line
        if line.starts_with("NOTE") || line.starts_with("STYLE") || line.starts_with("REGION") {
            in_block = true;
            continue;
        }
        if in_block {
            continue;
        }

        if line.contains("-->") || line.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let text = decode_entities(&strip_tags(line));
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            continue;
        }

        if lines.last() != Some(&text) {
            lines.push(text);
        }
    }

    lines.join(" ")
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;

    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    out
}

fn decode_entities(text: &str) -> String {
    // `&amp;` goes last so `&amp;lt;` stays a literal `&lt;`
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
