//! Per-request orchestration: classify, acquire, post-process, persist.

use anyhow::Context;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub mod processor;
pub mod speech;

use crate::acquisition::{AcquisitionChain, CaptionScraper, SpeechTier, SubtitleExtractor, Transcript};
use crate::config::{AcquisitionConfig, CacheConfig, Config};
use crate::extractors::direct::DirectDownloader;
use crate::extractors::local::LocalAudio;
use crate::extractors::youtube::lookup_metadata;
use crate::extractors::ytdlp::YtDlp;
use crate::extractors::{classify, AudioFormat, AudioKind, MediaSource};
use crate::postprocess::{PostProcessor, TextGenerator};
use crate::store::{NewTranscription, TranscriptionRecord, TranscriptionStatus, TranscriptionStore};
use crate::{Result, TranscriptorError};
use speech::{billable_seconds, cost_for_duration, SpeechToText};

/// What a caller asked to transcribe
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionRequest {
    /// A YouTube, podcast or direct audio URL
    Url(String),

    /// An audio file already staged on local disk
    Upload { file_name: String, path: PathBuf },
}

/// A transcript plus everything known about where it came from
#[derive(Debug)]
struct Acquired {
    transcript: Transcript,
    title: Option<String>,
    duration_seconds: Option<u64>,
}

pub struct TranscriptionPipeline {
    chain: AcquisitionChain,
    speech: Arc<dyn SpeechToText>,
    postprocessor: PostProcessor,
    store: Arc<dyn TranscriptionStore>,
    ytdlp: YtDlp,
    downloader: DirectDownloader,
    http: Client,
    acquisition: AcquisitionConfig,
    cache: CacheConfig,
    temp_root: Option<PathBuf>,
}

impl TranscriptionPipeline {
    /// Wire the pipeline with the standard caption, subtitle and speech-to-text chain
    pub fn new(
        config: &Config,
        http: Client,
        speech: Arc<dyn SpeechToText>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn TranscriptionStore>,
    ) -> Self {
        let ytdlp = YtDlp::new(&config.acquisition.yt_dlp_path);
        let chain = default_chain(&config.acquisition, http.clone(), ytdlp.clone(), speech.clone());

        Self {
            chain,
            postprocessor: PostProcessor::new(generator, &config.llm),
            speech,
            store,
            ytdlp,
            downloader: DirectDownloader::new(http.clone()),
            http,
            acquisition: config.acquisition.clone(),
            cache: config.cache.clone(),
            temp_root: config.app.temp_dir.clone(),
        }
    }

    /// Replace the acquisition chain
    pub fn with_chain(mut self, chain: AcquisitionChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn store(&self) -> &Arc<dyn TranscriptionStore> {
        &self.store
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.chain.strategy_names()
    }

    /// Run one request end to end and return the stored record
    pub async fn process(&self, request: TranscriptionRequest) -> Result<TranscriptionRecord> {
        let started = Instant::now();

        // A missing generator key must surface before anything is paid for
        self.postprocessor.ensure_ready()?;

        let (video_url, video_id, acquired) = match request {
            TranscriptionRequest::Url(input) => {
                let input = input.trim();
                if input.is_empty() {
                    return Err(TranscriptorError::InvalidRequest("videoUrl is required".to_string()).into());
                }

                let source = classify(input);
                let video_url = source.record_url(input);
                tracing::info!(url = %video_url, source = ?source, "Processing transcription request");

                match source {
                    MediaSource::YouTube { video_id } => {
                        if self.cache.reuse_completed {
                            if let Some(existing) = self.store.find_completed(&video_id).await? {
                                tracing::info!(id = %existing.id, video_id = %video_id, "Reusing completed transcription");
                                return Ok(existing);
                            }
                        }

                        let acquired = self.acquire_youtube(&video_id).await;
                        (video_url, video_id, acquired)
                    }
                    MediaSource::Audio { url, kind } => {
                        let acquired = self.acquire_remote_audio(&url, kind).await;
                        (video_url, String::new(), acquired)
                    }
                    MediaSource::Unsupported => {
                        return Err(TranscriptorError::UnsupportedUrl(input.to_string()).into());
                    }
                }
            }
            TranscriptionRequest::Upload { file_name, path } => {
                let acquired = self.acquire_upload(&file_name, &path).await;
                (format!("upload://{}", file_name), String::new(), acquired)
            }
        };

        let acquired = match acquired {
            Ok(acquired) => acquired,
            Err(err) => {
                let err = TranscriptorError::from_anyhow(err);
                if let TranscriptorError::NotTranscribable(message) = &err {
                    self.record_failure(&video_url, &video_id, message, started).await;
                }
                return Err(err.into());
            }
        };

        let transcript = acquired.transcript;
        let processed = self
            .postprocessor
            .process(&transcript.text, acquired.title.as_deref())
            .await?;

        let duration = acquired
            .duration_seconds
            .or_else(|| transcript.audio_seconds.map(|s| s.round() as u64))
            .unwrap_or(0);

        let record = NewTranscription {
            video_id,
            video_title: acquired.title.unwrap_or_default(),
            video_duration: duration,
            cleaned_transcript: processed.cleaned_transcript,
            summary: processed.summary,
            key_points: processed.key_points,
            transcript_method: transcript.method,
            input_tokens: processed.input_tokens,
            output_tokens: processed.output_tokens,
            cost: transcript.cost + processed.cost,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            status: TranscriptionStatus::Completed,
            raw_transcript: transcript.text,
            ..NewTranscription::new(video_url)
        };

        let stored = self.store.insert(record).await?;
        tracing::info!(
            id = %stored.id,
            method = %stored.transcript_method,
            cost = stored.cost,
            seconds = stored.processing_time_seconds,
            "Transcription completed"
        );

        Ok(stored)
    }

    async fn acquire_youtube(&self, video_id: &str) -> Result<Acquired> {
        let transcript = self
            .chain
            .acquire(video_id)
            .await
            .map_err(|e| TranscriptorError::NotTranscribable(e.to_string()))?;

        let metadata = if self.acquisition.lookup_metadata {
            lookup_metadata(&self.http, video_id, Duration::from_secs(self.acquisition.caption_timeout_secs)).await
        } else {
            Default::default()
        };

        Ok(Acquired {
            title: metadata.title.or_else(|| transcript.title.clone()),
            duration_seconds: metadata.duration_seconds,
            transcript,
        })
    }

    async fn acquire_remote_audio(&self, url: &str, kind: AudioKind) -> Result<Acquired> {
        self.speech.ensure_ready()?;
        let temp_dir = self.temp_dir()?;
        let max_bytes = self.acquisition.max_audio_bytes;
        let timeout = Duration::from_secs(self.acquisition.audio_timeout_secs);

        let result: Result<Acquired> = async {
            match kind {
                AudioKind::DirectFile => {
                    let audio = self.downloader.download(url, temp_dir.path(), max_bytes, timeout).await?;
                    let transcript = self.speech_transcript(&audio.path, audio.format, audio.size).await?;
                    Ok(Acquired {
                        title: audio.title,
                        duration_seconds: None,
                        transcript,
                    })
                }
                AudioKind::PodcastPage => {
                    let path = self.ytdlp.extract_audio(url, temp_dir.path(), max_bytes, timeout).await?;
                    let size = fs_err::metadata(&path)?.len();
                    let transcript = self.speech_transcript(&path, AudioFormat::Mp3, size).await?;

                    let info = match self
                        .ytdlp
                        .video_info(url, Duration::from_secs(self.acquisition.subtitle_timeout_secs))
                        .await
                    {
                        Ok(info) => info,
                        Err(e) => {
                            tracing::debug!(error = %e, "Podcast metadata unavailable");
                            Default::default()
                        }
                    };

                    Ok(Acquired {
                        title: info.title,
                        duration_seconds: info.duration_seconds,
                        transcript,
                    })
                }
            }
        }
        .await;

        result.map_err(not_transcribable)
    }

    async fn acquire_upload(&self, file_name: &str, path: &Path) -> Result<Acquired> {
        let audio = LocalAudio::inspect(path, file_name, self.acquisition.max_audio_bytes)
            .await
            .map_err(|e| TranscriptorError::InvalidRequest(format!("{:#}", e)))?;

        self.speech.ensure_ready()?;

        let transcript = self
            .speech_transcript(&audio.path, audio.format, audio.size)
            .await
            .map_err(not_transcribable)?;

        Ok(Acquired {
            title: Some(audio.title),
            duration_seconds: None,
            transcript,
        })
    }

    async fn speech_transcript(&self, path: &Path, format: AudioFormat, size: u64) -> Result<Transcript> {
        let speech = self.speech.transcribe(path, format).await?;
        if speech.text.trim().is_empty() {
            anyhow::bail!("speech-to-text returned an empty transcript");
        }

        let seconds = billable_seconds(speech.duration_seconds, size);

        Ok(Transcript {
            text: speech.text,
            method: self.speech.label().to_string(),
            cost: cost_for_duration(seconds, self.speech.rate_per_minute()),
            audio_seconds: Some(seconds),
            title: None,
        })
    }

    async fn record_failure(&self, video_url: &str, video_id: &str, message: &str, started: Instant) {
        if !self.cache.record_failures {
            return;
        }

        let record = NewTranscription {
            video_id: video_id.to_string(),
            status: TranscriptionStatus::Failed,
            error_message: message.to_string(),
            processing_time_seconds: started.elapsed().as_secs_f64(),
            ..NewTranscription::new(video_url)
        };

        if let Err(e) = self.store.insert(record).await {
            tracing::warn!(error = %e, "Failed to record transcription failure");
        }
    }

    fn temp_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tubescribe-");

        let dir = match &self.temp_root {
            Some(root) => {
                fs_err::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        };
        dir.context("Failed to create temporary directory")
    }
}

/// Caption scrape, then yt-dlp subtitles, then paid speech-to-text
pub fn default_chain(
    config: &AcquisitionConfig,
    http: Client,
    ytdlp: YtDlp,
    speech: Arc<dyn SpeechToText>,
) -> AcquisitionChain {
    AcquisitionChain::new(config.min_transcript_chars)
        .with_strategy(Box::new(CaptionScraper::new(
            http,
            config.caption_languages.clone(),
            Duration::from_secs(config.caption_timeout_secs),
        )))
        .with_strategy(Box::new(SubtitleExtractor::new(
            ytdlp.clone(),
            config.caption_languages.clone(),
            Duration::from_secs(config.subtitle_timeout_secs),
        )))
        .with_strategy(Box::new(SpeechTier::new(
            ytdlp,
            speech,
            config.max_audio_bytes,
            Duration::from_secs(config.audio_timeout_secs),
        )))
}

/// Typed errors pass through; anything else means the media could not be transcribed
fn not_transcribable(err: anyhow::Error) -> anyhow::Error {
    match err.downcast::<TranscriptorError>() {
        Ok(typed) => typed.into(),
        Err(other) => TranscriptorError::NotTranscribable(format!("{:#}", other)).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::MockTranscriptStrategy;
    use crate::postprocess::{Generation, MockTextGenerator};
    use crate::store::SqliteStore;
    use speech::{MockSpeechToText, SpeechTranscript};

    const LONG: &str = "Today we are talking about the ownership model in Rust and why it makes memory safety possible without a garbage collector.";

    fn config() -> Config {
        let mut config = Config::default();
        config.acquisition.lookup_metadata = false;
        config
    }

    fn generator(times: usize) -> Arc<dyn TextGenerator> {
        let mut mock = MockTextGenerator::new();
        mock.expect_ensure_ready().returning(|| Ok(()));
        mock.expect_generate().times(times).returning(|_| {
            Ok(Generation {
                text: r#"{"cleaned_transcript": "Cleaned.", "summary": "About ownership.", "key_points": ["Ownership", "Borrowing"]}"#
                    .to_string(),
                input_tokens: 1000,
                output_tokens: 200,
                truncated: false,
            })
        });
        Arc::new(mock)
    }

    fn idle_speech() -> Arc<dyn SpeechToText> {
        let mut mock = MockSpeechToText::new();
        mock.expect_ensure_ready().returning(|| Ok(()));
        mock.expect_transcribe().times(0);
        mock.expect_label().return_const("whisper-api");
        mock.expect_rate_per_minute().return_const(0.006);
        Arc::new(mock)
    }

    fn strategy(name: &'static str, times: usize, result: fn() -> Result<Transcript>) -> Box<dyn crate::TranscriptStrategy> {
        let mut mock = MockTranscriptStrategy::new();
        mock.expect_name().return_const(name);
        mock.expect_attempt().times(times).returning(move |_| result());
        Box::new(mock)
    }

    fn pipeline(
        config: &Config,
        speech: Arc<dyn SpeechToText>,
        generator: Arc<dyn TextGenerator>,
        chain: AcquisitionChain,
    ) -> (TranscriptionPipeline, Arc<dyn TranscriptionStore>) {
        let store: Arc<dyn TranscriptionStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let pipeline = TranscriptionPipeline::new(config, Client::new(), speech, generator, store.clone()).with_chain(chain);
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_youtube_captions_end_to_end() {
        let chain = AcquisitionChain::new(100)
            .with_strategy(strategy("youtube-captions", 1, || {
                Ok(Transcript {
                    title: Some("Rust ownership".to_string()),
                    ..Transcript::free(LONG, "youtube-captions")
                })
            }))
            .with_strategy(strategy("yt-dlp-subtitles", 0, || Ok(Transcript::free(LONG, "yt-dlp-subtitles"))));
        let (pipeline, store) = pipeline(&config(), idle_speech(), generator(1), chain);

        let record = pipeline
            .process(TranscriptionRequest::Url("https://youtu.be/dQw4w9WgXcQ".to_string()))
            .await
            .unwrap();

        assert_eq!(record.video_url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(record.video_id, "dQw4w9WgXcQ");
        assert_eq!(record.video_title, "Rust ownership");
        assert_eq!(record.raw_transcript, LONG);
        assert_eq!(record.cleaned_transcript, "Cleaned.");
        assert_eq!(record.key_points, vec!["Ownership", "Borrowing"]);
        assert_eq!(record.transcript_method, "youtube-captions");
        assert_eq!(record.status, TranscriptionStatus::Completed);
        assert!((record.cost - (1000.0 * 3.0 + 200.0 * 15.0) / 1_000_000.0).abs() < 1e-12);

        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_video_is_reused() {
        let (first, store) = pipeline(
            &config(),
            idle_speech(),
            generator(1),
            AcquisitionChain::new(100).with_strategy(strategy("youtube-captions", 1, || {
                Ok(Transcript::free(LONG, "youtube-captions"))
            })),
        );
        let original = first
            .process(TranscriptionRequest::Url("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()))
            .await
            .unwrap();

        let second = TranscriptionPipeline::new(&config(), Client::new(), idle_speech(), generator(0), store.clone())
            .with_chain(AcquisitionChain::new(100).with_strategy(strategy("youtube-captions", 0, || {
                Ok(Transcript::free(LONG, "youtube-captions"))
            })));

        let reused = second
            .process(TranscriptionRequest::Url("https://youtube.com/shorts/dQw4w9WgXcQ".to_string()))
            .await
            .unwrap();

        assert_eq!(reused, original);
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_not_transcribable() {
        let mut config = config();
        config.cache.record_failures = true;

        let chain = AcquisitionChain::new(100)
            .with_strategy(strategy("youtube-captions", 1, || Err(anyhow::anyhow!("no caption tracks published"))))
            .with_strategy(strategy("yt-dlp-subtitles", 1, || Ok(Transcript::free("short", "yt-dlp-subtitles"))));
        let (pipeline, store) = pipeline(&config, idle_speech(), generator(0), chain);

        let err = pipeline
            .process(TranscriptionRequest::Url("dQw4w9WgXcQ".to_string()))
            .await
            .unwrap_err();

        match err.downcast_ref::<TranscriptorError>() {
            Some(TranscriptorError::NotTranscribable(message)) => {
                assert!(message.contains("youtube-captions: no caption tracks published"));
                assert!(message.contains("yt-dlp-subtitles: transcript too short"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let records = store.list(None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TranscriptionStatus::Failed);
        assert!(records[0].error_message.contains("no caption tracks"));
        assert_eq!(records[0].video_title, crate::store::PLACEHOLDER_TITLE);
    }

    #[tokio::test]
    async fn test_unsupported_url_and_missing_generator_key() {
        let (unsupported, _) = pipeline(&config(), idle_speech(), generator(0), AcquisitionChain::new(100));
        let err = unsupported
            .process(TranscriptionRequest::Url("https://example.com/article".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TranscriptorError>(),
            Some(TranscriptorError::UnsupportedUrl(_))
        ));

        let mut unconfigured = MockTextGenerator::new();
        unconfigured
            .expect_ensure_ready()
            .returning(|| Err(TranscriptorError::Config("text generation API key is not configured".to_string()).into()));
        unconfigured.expect_generate().times(0);

        let chain = AcquisitionChain::new(100)
            .with_strategy(strategy("youtube-captions", 0, || Ok(Transcript::free(LONG, "youtube-captions"))));
        let (unconfigured, _) = pipeline(&config(), idle_speech(), Arc::new(unconfigured), chain);

        let err = unconfigured
            .process(TranscriptionRequest::Url("https://youtu.be/dQw4w9WgXcQ".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<TranscriptorError>(), Some(TranscriptorError::Config(_))));
    }

    #[tokio::test]
    async fn test_upload_is_priced_from_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged");
        // Half a MiB estimates to thirty seconds
        fs_err::write(&path, vec![0u8; 512 * 1024]).unwrap();

        let mut speech = MockSpeechToText::new();
        speech.expect_ensure_ready().returning(|| Ok(()));
        speech
            .expect_transcribe()
            .withf(|_, format| *format == AudioFormat::M4a)
            .times(1)
            .returning(|_, _| {
                Ok(SpeechTranscript {
                    text: LONG.to_string(),
                    duration_seconds: None,
                    language: None,
                })
            });
        speech.expect_label().return_const("whisper-api");
        speech.expect_rate_per_minute().return_const(0.006);

        let (pipeline, _) = pipeline(&config(), Arc::new(speech), generator(1), AcquisitionChain::new(100));
        let record = pipeline
            .process(TranscriptionRequest::Upload {
                file_name: "Weekly sync.m4a".to_string(),
                path,
            })
            .await
            .unwrap();

        assert_eq!(record.video_url, "upload://Weekly sync.m4a");
        assert_eq!(record.video_title, "Weekly sync");
        assert_eq!(record.video_duration, 30);
        assert_eq!(record.transcript_method, "whisper-api");
        let expected = 0.003 + (1000.0 * 3.0 + 200.0 * 15.0) / 1_000_000.0;
        assert!((record.cost - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_bad_upload_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs_err::write(&path, b"hello").unwrap();

        let (pipeline, _) = pipeline(&config(), idle_speech(), generator(0), AcquisitionChain::new(100));
        let err = pipeline
            .process(TranscriptionRequest::Upload {
                file_name: "notes.txt".to_string(),
                path,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<TranscriptorError>(),
            Some(TranscriptorError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_not_transcribable_keeps_typed_errors() {
        let config_err = not_transcribable(TranscriptorError::Config("missing key".to_string()).into());
        assert!(matches!(config_err.downcast_ref::<TranscriptorError>(), Some(TranscriptorError::Config(_))));

        let other = not_transcribable(anyhow::anyhow!("yt-dlp failed: 403"));
        assert!(matches!(
            other.downcast_ref::<TranscriptorError>(),
            Some(TranscriptorError::NotTranscribable(_))
        ));
    }

    #[test]
    fn test_default_chain_order() {
        let chain = default_chain(&AcquisitionConfig::default(), Client::new(), YtDlp::default(), idle_speech());
        assert_eq!(chain.strategy_names(), vec!["youtube-captions", "yt-dlp-subtitles", "speech-to-text"]);
    }
}
