use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{Transcript, TranscriptStrategy};
use crate::extractors::{canonical_url, ytdlp::YtDlp, AudioFormat};
use crate::transcribe::speech::{billable_seconds, cost_for_duration, SpeechToText};
use crate::Result;

/// Tier 3: download the audio track and pay for speech-to-text
pub struct SpeechTier {
    ytdlp: YtDlp,
    engine: Arc<dyn SpeechToText>,
    max_audio_bytes: u64,
    timeout: Duration,
}

impl SpeechTier {
    pub fn new(ytdlp: YtDlp, engine: Arc<dyn SpeechToText>, max_audio_bytes: u64, timeout: Duration) -> Self {
        Self {
            ytdlp,
            engine,
            max_audio_bytes,
            timeout,
        }
    }
}

#[async_trait]
impl TranscriptStrategy for SpeechTier {
    async fn attempt(&self, video_id: &str) -> Result<Transcript> {
        self.engine.ensure_ready()?;

        let temp_dir = tempfile::tempdir()?;
        let audio_path = self
            .ytdlp
            .extract_audio(&canonical_url(video_id), temp_dir.path(), self.max_audio_bytes, self.timeout)
            .await?;
        let size = fs_err::metadata(&audio_path)?.len();

        let speech = self.engine.transcribe(&audio_path, AudioFormat::Mp3).await?;
        let seconds = billable_seconds(speech.duration_seconds, size);

        Ok(Transcript {
            text: speech.text,
            method: self.engine.label().to_string(),
            cost: cost_for_duration(seconds, self.engine.rate_per_minute()),
            audio_seconds: Some(seconds),
            title: None,
        })
    }

    fn name(&self) -> &'static str {
        "speech-to-text"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::speech::{MockSpeechToText, SpeechTranscript};

    #[tokio::test]
    async fn test_engine_not_ready_skips_download() {
        let mut engine = MockSpeechToText::new();
        engine
            .expect_ensure_ready()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("speech-to-text API key is not configured")));
        engine.expect_transcribe().times(0);

        let tier = SpeechTier::new(
            YtDlp::new("definitely-not-a-real-yt-dlp-binary"),
            Arc::new(engine),
            1024,
            Duration::from_secs(1),
        );

        let err = tier.attempt("dQw4w9WgXcQ").await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
        assert_eq!(tier.name(), "speech-to-text");
    }

    #[tokio::test]
    async fn test_missing_yt_dlp_fails_before_transcription() {
        let mut engine = MockSpeechToText::new();
        engine.expect_ensure_ready().returning(|| Ok(()));
        engine.expect_transcribe().times(0);

        let tier = SpeechTier::new(
            YtDlp::new("definitely-not-a-real-yt-dlp-binary"),
            Arc::new(engine),
            1024,
            Duration::from_secs(1),
        );

        assert!(tier.attempt("dQw4w9WgXcQ").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_downloaded_audio_is_transcribed_and_priced() {
        let bin = tempfile::tempdir().unwrap();
        let ytdlp = crate::extractors::ytdlp::fake_yt_dlp(bin.path(), Some(("mp3", "ID3 fake audio")));

        let mut engine = MockSpeechToText::new();
        engine.expect_ensure_ready().returning(|| Ok(()));
        engine
            .expect_transcribe()
            .times(1)
            .withf(|path, format| path.ends_with("audio.mp3") && *format == AudioFormat::Mp3)
            .returning(|_, _| {
                Ok(SpeechTranscript {
                    text: "Spoken words from the video.".to_string(),
                    duration_seconds: Some(600.0),
                    language: Some("en".to_string()),
                })
            });
        engine.expect_label().return_const("whisper-api");
        engine.expect_rate_per_minute().return_const(0.006);

        let tier = SpeechTier::new(ytdlp, Arc::new(engine), 1024, Duration::from_secs(5));
        let transcript = tier.attempt("dQw4w9WgXcQ").await.unwrap();

        assert_eq!(transcript.text, "Spoken words from the video.");
        assert_eq!(transcript.method, "whisper-api");
        assert_eq!(transcript.audio_seconds, Some(600.0));
        assert!((transcript.cost - 0.06).abs() < 1e-9);
    }
}
