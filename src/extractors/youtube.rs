use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::Result;

const ID_CHARS: &str = r"[A-Za-z0-9_-]";

/// URL shapes checked in order; the first match wins
static VIDEO_URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    let end = r"(?:[^A-Za-z0-9_-]|$)";
    [
        format!(r"(?i)(?:^|[/.])youtube\.com/watch\?(?:[^#]*&)?v=({ID_CHARS}{{11}}){end}"),
        format!(r"(?i)(?:^|[/.])youtu\.be/({ID_CHARS}{{11}}){end}"),
        format!(r"(?i)(?:^|[/.])youtube(?:-nocookie)?\.com/embed/({ID_CHARS}{{11}}){end}"),
        format!(r"(?i)(?:^|[/.])youtube\.com/shorts/({ID_CHARS}{{11}}){end}"),
        format!(r"(?i)(?:^|[/.])youtube\.com/(?:v|live)/({ID_CHARS}{{11}}){end}"),
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid YouTube URL pattern"))
    .collect()
});

static BARE_VIDEO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{ID_CHARS}{{11}}$")).expect("valid video id pattern"));

/// Extract the 11-character video identifier from a YouTube URL or a bare identifier
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();

    if BARE_VIDEO_ID.is_match(input) {
        return Some(input.to_string());
    }

    VIDEO_URL_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(input))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Canonical watch URL for a video identifier
pub fn canonical_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Best-effort metadata for a video
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub duration_seconds: Option<u64>,
}

/// One entry of the player response `captionTracks` list
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    pub base_url: String,
    pub language_code: String,
    /// `"asr"` for auto-generated tracks
    #[serde(default)]
    pub kind: Option<String>,
}

impl CaptionTrack {
    pub fn is_auto_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }
}

/// The public watch page of a video
pub struct WatchPage {
    html: String,
}

impl WatchPage {
    /// Fetch the watch page without authentication
    pub async fn fetch(client: &Client, video_id: &str, timeout: Duration) -> Result<Self> {
        let response = client
            .get(canonical_url(video_id))
            .header("Accept-Language", "en-US,en;q=0.9")
            .timeout(timeout)
            .send()
            .await
            .context("Failed to fetch watch page")?;

        if !response.status().is_success() {
            anyhow::bail!("Watch page returned HTTP {}", response.status());
        }

        let html = response.text().await
            .context("Failed to read watch page")?;

        Ok(Self { html })
    }

    pub fn from_html(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    /// Caption tracks listed in the embedded player response
    pub fn caption_tracks(&self) -> Vec<CaptionTrack> {
        extract_json_after(&self.html, "\"captionTracks\":")
            .and_then(|raw| serde_json::from_str::<Vec<CaptionTrack>>(raw).ok())
            .unwrap_or_default()
    }

    /// Title and length from the embedded `videoDetails` object
    pub fn metadata(&self) -> VideoMetadata {
        let details = extract_json_after(&self.html, "\"videoDetails\":")
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok());

        let Some(details) = details else {
            return VideoMetadata::default();
        };

        let title = details["title"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let duration_seconds = details["lengthSeconds"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .or_else(|| details["lengthSeconds"].as_u64());

        VideoMetadata { title, duration_seconds }
    }
}

/// Pick the caption track for a language code, or `None` for auto-detect
pub fn select_track<'a>(tracks: &'a [CaptionTrack], language: Option<&str>) -> Option<&'a CaptionTrack> {
    match language {
        Some(code) => tracks
            .iter()
            .filter(|t| t.language_code.eq_ignore_ascii_case(code))
            .min_by_key(|t| t.is_auto_generated()),
        None => tracks
            .iter()
            .min_by_key(|t| t.is_auto_generated()),
    }
}

#[derive(Debug, Deserialize)]
struct TimedText {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Debug, Deserialize)]
struct TimedTextEvent {
    #[serde(default)]
    segs: Option<Vec<TimedTextSegment>>,
}

#[derive(Debug, Deserialize)]
struct TimedTextSegment {
    #[serde(default)]
    utf8: String,
}

/// Download a caption track in `json3` form and flatten it to plain text
pub async fn fetch_track_text(client: &Client, track: &CaptionTrack, timeout: Duration) -> Result<String> {
    let url = if track.base_url.contains("fmt=") {
        track.base_url.clone()
    } else {
        format!("{}&fmt=json3", track.base_url)
    };

    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .context("Failed to fetch caption track")?;

    if !response.status().is_success() {
        anyhow::bail!("Caption track returned HTTP {}", response.status());
    }

    let body = response.text().await?;
    timed_text_to_plain(&body)
}

/// Join the segments of a `json3` timed-text document
pub fn timed_text_to_plain(body: &str) -> Result<String> {
    let doc: TimedText = serde_json::from_str(body)
        .context("Caption track is not valid json3")?;

    let text = doc
        .events
        .iter()
        .filter_map(|event| event.segs.as_ref())
        .map(|segs| segs.iter().map(|s| s.utf8.as_str()).collect::<String>())
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Ok(text)
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: Option<String>,
}

/// Look up title and duration; the watch page first, oEmbed for the title as a fallback
pub async fn lookup_metadata(client: &Client, video_id: &str, timeout: Duration) -> VideoMetadata {
    match WatchPage::fetch(client, video_id, timeout).await {
        Ok(page) => {
            let metadata = page.metadata();
            if metadata.title.is_some() {
                return metadata;
            }
        }
        Err(e) => tracing::debug!(error = %e, "Watch page metadata lookup failed"),
    }

    let oembed_url = format!(
        "https://www.youtube.com/oembed?url={}&format=json",
        urlencoding::encode(&canonical_url(video_id))
    );

    let title = async {
        let response = client.get(&oembed_url).timeout(timeout).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json::<OEmbed>().await.ok()?.title
    }
    .await;

    VideoMetadata { title, duration_seconds: None }
}

/// Slice the JSON value (object or array) that starts right after `marker`
fn extract_json_after<'a>(haystack: &'a str, marker: &str) -> Option<&'a str> {
    let start = haystack.find(marker)? + marker.len();
    let rest = haystack[start..].trim_start();
    let offset = haystack.len() - rest.len();

    let open = rest.chars().next()?;
    let close = match open {
        '[' => ']',
        '{' => '}',
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in rest.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&haystack[offset..offset + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}
