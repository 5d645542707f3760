use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{Transcript, TranscriptStrategy};
use crate::extractors::youtube::{fetch_track_text, select_track, WatchPage};
use crate::Result;

/// Tier 1: public caption tracks, no audio processing
pub struct CaptionScraper {
    client: Client,
    languages: Vec<String>,
    timeout: Duration,
}

impl CaptionScraper {
    pub fn new(client: Client, languages: Vec<String>, timeout: Duration) -> Self {
        Self {
            client,
            languages,
            timeout,
        }
    }

    /// Language codes in the order they are tried; `None` means auto-detect
    fn language_order(&self) -> Vec<Option<&str>> {
        self.languages
            .iter()
            .map(|lang| Some(lang.as_str()))
            .chain(std::iter::once(None))
            .collect()
    }
}

#[async_trait]
impl TranscriptStrategy for CaptionScraper {
    async fn attempt(&self, video_id: &str) -> Result<Transcript> {
        let page = WatchPage::fetch(&self.client, video_id, self.timeout).await?;
        let tracks = page.caption_tracks();

        if tracks.is_empty() {
            anyhow::bail!("no caption tracks published");
        }

        let mut last_error = None;

        for language in self.language_order() {
            let Some(track) = select_track(&tracks, language) else {
                continue;
            };

            tracing::debug!(
                language = language.unwrap_or("auto"),
                track = %track.language_code,
                "Fetching caption track"
            );

            match fetch_track_text(&self.client, track, self.timeout).await {
                Ok(text) if !text.trim().is_empty() => {
                    return Ok(Transcript {
                        title: page.metadata().title,
                        ..Transcript::free(text, self.name())
                    });
                }
                Ok(_) => last_error = Some(format!("{} captions were empty", track.language_code)),
                Err(e) => last_error = Some(format!("{:#}", e)),
            }
        }

        anyhow::bail!(last_error.unwrap_or_else(|| "no caption track matched".to_string()))
    }

    fn name(&self) -> &'static str {
        "youtube-captions"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_order_ends_with_auto_detect() {
        let scraper = CaptionScraper::new(
            Client::new(),
            vec!["en".to_string(), "en-US".to_string(), "en-GB".to_string()],
            Duration::from_secs(1),
        );
        assert_eq!(
            scraper.language_order(),
            vec![Some("en"), Some("en-US"), Some("en-GB"), None]
        );
        assert_eq!(scraper.name(), "youtube-captions");
    }
}
