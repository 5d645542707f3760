use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::config::SpeechConfig;
use crate::extractors::AudioFormat;
use crate::{Result, TranscriptorError};

/// Bytes per minute used to estimate duration when the engine reports none
pub const BYTES_PER_MINUTE_ESTIMATE: f64 = 1024.0 * 1024.0;

/// Text produced by a speech-to-text engine
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechTranscript {
    pub text: String,
    /// Audio length reported by the engine
    pub duration_seconds: Option<f64>,
    pub language: Option<String>,
}

/// A paid speech-to-text service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a local audio file
    async fn transcribe(&self, audio_path: &Path, format: AudioFormat) -> Result<SpeechTranscript>;

    /// Provenance label stored on records
    fn label(&self) -> &'static str;

    /// Dollars per audio minute
    fn rate_per_minute(&self) -> f64;

    /// Fail fast when credentials are missing, before any paid call
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }
}

/// Cost of transcribing `duration_seconds` of audio
pub fn cost_for_duration(duration_seconds: f64, rate_per_minute: f64) -> f64 {
    (duration_seconds.max(0.0) / 60.0) * rate_per_minute
}

/// Duration proxy derived from file size
pub fn estimate_duration_from_size(size_bytes: u64) -> f64 {
    (size_bytes as f64 / BYTES_PER_MINUTE_ESTIMATE) * 60.0
}

/// Reported duration, or the size-based estimate
pub fn billable_seconds(reported: Option<f64>, size_bytes: u64) -> f64 {
    reported
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or_else(|| estimate_duration_from_size(size_bytes))
}

/// OpenAI-compatible `/audio/transcriptions` client
pub struct WhisperApi {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    rate_per_minute: f64,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    language: Option<String>,
}

impl WhisperApi {
    pub fn new(client: Client, config: &SpeechConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            rate_per_minute: config.rate_per_minute,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperApi {
    async fn transcribe(&self, audio_path: &Path, format: AudioFormat) -> Result<SpeechTranscript> {
        self.ensure_ready()?;

        let content = tokio::fs::read(audio_path)
            .await
            .with_context(|| format!("Failed to read {}", audio_path.display()))?;

        let file_name = format!("audio.{}", format.as_str());
        let part = Part::bytes(content)
            .file_name(file_name)
            .mime_str(format.mime_type())?;

        let form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", part);

        tracing::info!("Submitting audio to {} ({})", self.endpoint, self.model);

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.endpoint))
            .bearer_auth(self.api_key.as_deref().unwrap_or_default())
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .context("Speech-to-text request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("speech-to-text API returned {}: {}", status, body.trim());
        }

        let parsed: WhisperResponse = response
            .json()
            .await
            .context("Failed to parse speech-to-text response")?;

        Ok(SpeechTranscript {
            text: parsed.text.trim().to_string(),
            duration_seconds: parsed.duration,
            language: parsed.language,
        })
    }

    fn label(&self) -> &'static str {
        "whisper-api"
    }

    fn rate_per_minute(&self) -> f64 {
        self.rate_per_minute
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(TranscriptorError::Config(
                "speech-to-text API key is not configured (set OPENAI_API_KEY)".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_minutes_costs_six_cents() {
        let cost = cost_for_duration(600.0, 0.006);
        assert!((cost - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_size_estimate_when_duration_unknown() {
        let five_mib = 5 * 1024 * 1024;
        assert!((billable_seconds(None, five_mib) - 300.0).abs() < 1e-9);
        assert!((billable_seconds(Some(0.0), five_mib) - 300.0).abs() < 1e-9);
        assert!((billable_seconds(Some(42.5), five_mib) - 42.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let api = WhisperApi::new(Client::new(), &SpeechConfig::default());
        let err = api.ensure_ready().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TranscriptorError>(),
            Some(TranscriptorError::Config(_))
        ));
    }

    #[test]
    fn test_parse_verbose_json() {
        let body = r#"{"task":"transcribe","language":"english","duration":61.2,"text":" Hello there. ","segments":[]}"#;
        let parsed: WhisperResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.duration, Some(61.2));
        assert_eq!(parsed.language.as_deref(), Some("english"));
        assert_eq!(parsed.text.trim(), "Hello there.");
    }
}
