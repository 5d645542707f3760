//! Ordered transcript acquisition.
//!
//! Strategies are tried cheapest first. A strategy's result is accepted as soon as its
//! trimmed text reaches the minimum length; errors, empty results and short results all
//! advance to the next strategy. Only when every strategy has been tried does the chain
//! fail, with every strategy's reason in the message.

use async_trait::async_trait;
use serde::Serialize;

pub mod captions;
pub mod speech;
pub mod subtitles;

pub use captions::CaptionScraper;
pub use speech::SpeechTier;
pub use subtitles::SubtitleExtractor;

use crate::Result;

/// A transcript plus how it was obtained
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub text: String,

    /// Provenance label, e.g. `youtube-captions`
    pub method: String,

    /// Dollars spent obtaining the transcript
    pub cost: f64,

    /// Length of the audio that was transcribed, when known
    pub audio_seconds: Option<f64>,

    /// Title discovered along the way
    pub title: Option<String>,
}

impl Transcript {
    pub fn free(text: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            method: method.into(),
            cost: 0.0,
            audio_seconds: None,
            title: None,
        }
    }

    /// Character count of the trimmed text
    pub fn char_len(&self) -> usize {
        self.text.trim().chars().count()
    }
}

/// One tier of the fallback chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptStrategy: Send + Sync {
    /// Try to produce a transcript for a YouTube video identifier
    async fn attempt(&self, video_id: &str) -> Result<Transcript>;

    /// Short name used in logs and failure messages
    fn name(&self) -> &'static str;
}

/// Every strategy failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", format_failures(.failures))]
pub struct AcquisitionError {
    /// `(strategy name, reason)` in the order they were tried
    pub failures: Vec<(String, String)>,
}

fn format_failures(failures: &[(String, String)]) -> String {
    if failures.is_empty() {
        return "no transcript strategies configured".to_string();
    }

    failures
        .iter()
        .map(|(name, reason)| format!("{}: {}", name, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Drives the strategies in priority order
pub struct AcquisitionChain {
    strategies: Vec<Box<dyn TranscriptStrategy>>,
    min_chars: usize,
}

impl AcquisitionChain {
    pub fn new(min_chars: usize) -> Self {
        Self {
            strategies: Vec::new(),
            min_chars,
        }
    }

    /// Append a strategy; strategies run in registration order
    pub fn with_strategy(mut self, strategy: Box<dyn TranscriptStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Return the first acceptable transcript
    pub async fn acquire(&self, video_id: &str) -> std::result::Result<Transcript, AcquisitionError> {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            let name = strategy.name();
            tracing::info!(strategy = name, video_id, "Trying transcript strategy");

            let reason = match strategy.attempt(video_id).await {
                Ok(transcript) if transcript.char_len() >= self.min_chars => {
                    tracing::info!(
                        strategy = name,
                        chars = transcript.char_len(),
                        "Transcript acquired"
                    );
                    return Ok(transcript);
                }
                Ok(transcript) if transcript.char_len() == 0 => "empty transcript".to_string(),
                Ok(transcript) => format!(
                    "transcript too short ({} < {} chars)",
                    transcript.char_len(),
                    self.min_chars
                ),
                Err(e) => format!("{:#}", e),
            };

            tracing::warn!(strategy = name, reason = %reason, "Transcript strategy failed");
            failures.push((name.to_string(), reason));
        }

        Err(AcquisitionError { failures })
    }
}
