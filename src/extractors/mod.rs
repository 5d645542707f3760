use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

pub mod direct;
pub mod local;
pub mod youtube;
pub mod ytdlp;

use crate::Result;

pub use youtube::{canonical_url, extract_video_id};

/// What an input string points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A YouTube video with its 11-character identifier
    YouTube { video_id: String },

    /// A podcast page or a direct audio file
    Audio { url: String, kind: AudioKind },

    /// Anything else
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioKind {
    /// The URL path ends in a media file extension
    DirectFile,
    /// A page on a known podcast host, resolved through yt-dlp
    PodcastPage,
}

impl MediaSource {
    /// URL stored on the record
    pub fn record_url(&self, original: &str) -> String {
        match self {
            MediaSource::YouTube { video_id } => canonical_url(video_id),
            MediaSource::Audio { url, .. } => url.clone(),
            MediaSource::Unsupported => original.trim().to_string(),
        }
    }
}

/// Hosts whose pages are treated as podcast episodes
const PODCAST_HOSTS: &[&str] = &[
    "podcasts.apple.com",
    "open.spotify.com",
    "soundcloud.com",
    "anchor.fm",
    "podbean.com",
    "buzzsprout.com",
    "libsyn.com",
    "simplecast.com",
    "transistor.fm",
    "megaphone.fm",
    "omny.fm",
    "spreaker.com",
    "audioboom.com",
];

/// Classify an arbitrary input string
pub fn classify(input: &str) -> MediaSource {
    let input = input.trim();

    if let Some(video_id) = extract_video_id(input) {
        return MediaSource::YouTube { video_id };
    }

    let Ok(parsed) = validate_url(input) else {
        return MediaSource::Unsupported;
    };

    if has_media_extension(&parsed) {
        return MediaSource::Audio {
            url: parsed.to_string(),
            kind: AudioKind::DirectFile,
        };
    }

    if is_podcast_host(&parsed) {
        return MediaSource::Audio {
            url: parsed.to_string(),
            kind: AudioKind::PodcastPage,
        };
    }

    MediaSource::Unsupported
}

fn has_media_extension(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|filename| Path::new(filename).extension())
        .and_then(|ext| ext.to_str())
        .and_then(AudioFormat::from_extension)
        .is_some()
}

fn is_podcast_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    PODCAST_HOSTS
        .iter()
        .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
}

/// Supported audio formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Mp3,
    M4a,
    Wav,
    Flac,
    Ogg,
    Webm,
    Mp4,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Webm => "webm",
            AudioFormat::Mp4 => "mp4",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" | "mpga" | "mpeg" => Some(AudioFormat::Mp3),
            "m4a" | "aac" => Some(AudioFormat::M4a),
            "wav" => Some(AudioFormat::Wav),
            "flac" => Some(AudioFormat::Flac),
            "ogg" | "oga" | "opus" => Some(AudioFormat::Ogg),
            "webm" => Some(AudioFormat::Webm),
            "mp4" => Some(AudioFormat::Mp4),
            _ => None,
        }
    }

    /// Format from a file name or path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Get MIME type for the format
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Webm => "audio/webm",
            AudioFormat::Mp4 => "video/mp4",
        }
    }
}

/// Validate and normalize URLs
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|_| anyhow::anyhow!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol");
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_youtube() {
        assert_eq!(
            classify("https://youtu.be/dQw4w9WgXcQ"),
            MediaSource::YouTube { video_id: "dQw4w9WgXcQ".to_string() }
        );
    }

    #[test]
    fn test_classify_direct_audio() {
        let source = classify("https://cdn.example.com/episodes/ep-42.MP3?token=abc");
        assert!(matches!(source, MediaSource::Audio { kind: AudioKind::DirectFile, .. }));
    }

    #[test]
    fn test_classify_podcast_host() {
        let source = classify("https://podcasts.apple.com/us/podcast/some-show/id123?i=456");
        assert!(matches!(source, MediaSource::Audio { kind: AudioKind::PodcastPage, .. }));

        let source = classify("https://www.soundcloud.com/artist/track");
        assert!(matches!(source, MediaSource::Audio { kind: AudioKind::PodcastPage, .. }));

        let source = classify("https://feeds.megaphone.fm/show");
        assert!(matches!(source, MediaSource::Audio { kind: AudioKind::PodcastPage, .. }));
    }

    #[test]
    fn test_classify_unsupported() {
        assert_eq!(classify("https://example.com/article"), MediaSource::Unsupported);
        assert_eq!(classify("ftp://example.com/file.mp3"), MediaSource::Unsupported);
        assert_eq!(classify("not a url"), MediaSource::Unsupported);
        assert_eq!(classify(""), MediaSource::Unsupported);
        // A look-alike host must not pass the allowlist
        assert_eq!(classify("https://notsoundcloud.com/track"), MediaSource::Unsupported);
    }

    #[test]
    fn test_record_url_is_canonical_for_youtube() {
        let source = classify("https://www.youtube.com/shorts/dQw4w9WgXcQ");
        assert_eq!(
            source.record_url("https://www.youtube.com/shorts/dQw4w9WgXcQ"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }

    #[test]
    fn test_audio_format_from_extension() {
        assert_eq!(AudioFormat::from_extension("MP3"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::from_extension("opus"), Some(AudioFormat::Ogg));
        assert_eq!(AudioFormat::from_extension("txt"), None);
        assert_eq!(AudioFormat::from_path(Path::new("/tmp/a.m4a")), Some(AudioFormat::M4a));
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not-a-url").is_err());
    }
}
