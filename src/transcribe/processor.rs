use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_transcribe::types::{Media, MediaFormat, TranscriptionJob, TranscriptionJobStatus};
use aws_sdk_transcribe::Client as TranscribeClient;
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use uuid::Uuid;

use super::speech::{SpeechToText, SpeechTranscript};
use crate::config::Config;
use crate::extractors::AudioFormat;

/// AWS Transcribe transcript format
#[derive(Debug, Deserialize)]
struct AwsTranscript {
    results: TranscriptResults,
}

#[derive(Debug, Deserialize)]
struct TranscriptResults {
    transcripts: Vec<TranscriptText>,
    #[serde(default)]
    items: Vec<TranscriptItem>,
}

#[derive(Debug, Deserialize)]
struct TranscriptText {
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptItem {
    end_time: Option<String>,
}

/// Speech-to-text through AWS Transcribe batch jobs
pub struct AwsTranscribeEngine {
    s3_client: S3Client,
    transcribe_client: TranscribeClient,
    http: reqwest::Client,
    bucket: String,
    key_prefix: String,
    default_language: Option<String>,
    rate_per_minute: f64,
    job_timeout: Duration,
}

impl AwsTranscribeEngine {
    /// Build the engine from the shared AWS configuration
    pub async fn new(config: &Config, http: reqwest::Client) -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(config.aws_region())
            .load()
            .await;

        Self {
            s3_client: S3Client::new(&aws_config),
            transcribe_client: TranscribeClient::new(&aws_config),
            http,
            bucket: config.speech.aws.s3_bucket.clone(),
            key_prefix: config.speech.aws.s3_key_prefix.clone().unwrap_or_default(),
            default_language: config.speech.aws.default_language.clone(),
            rate_per_minute: config.speech.rate_per_minute,
            job_timeout: Duration::from_secs(config.speech.timeout_secs),
        }
    }

    /// Upload audio file to S3
    async fn upload_to_s3(&self, audio_path: &Path, format: AudioFormat) -> Result<String> {
        let key = format!(
            "{}audio_{}_{}.{}",
            self.key_prefix,
            Uuid::new_v4(),
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            format.as_str()
        );

        tracing::info!("Uploading audio to S3: s3://{}/{}", self.bucket, key);

        let content = fs_err::read(audio_path)?;

        self.s3_client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(content.into())
            .content_type(format.mime_type())
            .send()
            .await
            .context("Failed to upload audio to S3")?;

        Ok(key)
    }

    /// Start a job with automatic language detection unless a default language is set
    async fn start_job(&self, s3_key: &str, format: AudioFormat) -> Result<String> {
        let job_name = format!("tubescribe_{}", Uuid::new_v4());
        let media_uri = format!("s3://{}/{}", self.bucket, s3_key);

        tracing::info!("Starting transcription job: {}", job_name);

        let media_format = match format {
            AudioFormat::Mp3 => MediaFormat::Mp3,
            AudioFormat::M4a | AudioFormat::Mp4 => MediaFormat::Mp4,
            AudioFormat::Wav => MediaFormat::Wav,
            AudioFormat::Flac => MediaFormat::Flac,
            AudioFormat::Ogg => MediaFormat::Ogg,
            AudioFormat::Webm => MediaFormat::Webm,
        };

        let media = Media::builder().media_file_uri(media_uri).build();

        let mut job_builder = self
            .transcribe_client
            .start_transcription_job()
            .transcription_job_name(&job_name)
            .media_format(media_format)
            .media(media);

        if let Some(lang) = self.default_language.as_deref() {
            job_builder = job_builder.language_code(lang.into());
        } else {
            job_builder = job_builder.identify_language(true);
        }

        job_builder
            .send()
            .await
            .context("Failed to start transcription job")?;

        Ok(job_name)
    }

    /// Poll until the job finishes, backing off up to 30 seconds between checks
    async fn wait_for_completion(&self, job_name: &str) -> Result<TranscriptionJob> {
        let start = Instant::now();
        let mut check_count: u64 = 0;

        loop {
            check_count += 1;
            let job = self.get_job(job_name).await?;

            match job.transcription_job_status() {
                Some(TranscriptionJobStatus::Completed) => return Ok(job),
                Some(TranscriptionJobStatus::Failed) => {
                    let failure_reason = job.failure_reason().unwrap_or("Unknown error");
                    anyhow::bail!("Transcription job failed: {}", failure_reason);
                }
                Some(TranscriptionJobStatus::InProgress) | Some(TranscriptionJobStatus::Queued) => {
                    if start.elapsed() > self.job_timeout {
                        anyhow::bail!("Transcription job timed out after {}s", self.job_timeout.as_secs());
                    }
                    tracing::debug!("Job {} still running (check #{})", job_name, check_count);
                    let wait_time = std::cmp::min(5 + (check_count - 1) * 2, 30);
                    sleep(Duration::from_secs(wait_time)).await;
                }
                _ => anyhow::bail!("Unexpected transcription job status"),
            }
        }
    }

    async fn get_job(&self, job_name: &str) -> Result<TranscriptionJob> {
        let response = self
            .transcribe_client
            .get_transcription_job()
            .transcription_job_name(job_name)
            .send()
            .await
            .context("Failed to get transcription job status")?;

        response
            .transcription_job()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Transcription job not found"))
    }

    async fn fetch_result(&self, job: &TranscriptionJob) -> Result<SpeechTranscript> {
        let transcript_uri = job
            .transcript()
            .and_then(|t| t.transcript_file_uri())
            .ok_or_else(|| anyhow::anyhow!("No transcript URI found"))?;

        let response = self
            .http
            .get(transcript_uri)
            .send()
            .await
            .context("Failed to download transcript")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download transcript: HTTP {}", response.status());
        }

        let body = response.text().await.context("Failed to read transcript content")?;
        let mut transcript = parse_aws_transcript(&body)?;
        transcript.language = job.language_code().map(|lc| lc.as_str().to_string());
        Ok(transcript)
    }

    async fn cleanup_s3(&self, s3_key: &str) {
        tracing::debug!("Cleaning up S3 object: {}", s3_key);

        if let Err(e) = self
            .s3_client
            .delete_object()
            .bucket(&self.bucket)
            .key(s3_key)
            .send()
            .await
        {
            tracing::warn!(error = %e, key = s3_key, "Failed to clean up S3 object");
        }
    }
}

#[async_trait]
impl SpeechToText for AwsTranscribeEngine {
    async fn transcribe(&self, audio_path: &Path, format: AudioFormat) -> Result<SpeechTranscript> {
        let s3_key = self.upload_to_s3(audio_path, format).await?;

        let result = async {
            let job_name = self.start_job(&s3_key, format).await?;
            let job = self.wait_for_completion(&job_name).await?;
            self.fetch_result(&job).await
        }
        .await;

        self.cleanup_s3(&s3_key).await;
        result
    }

    fn label(&self) -> &'static str {
        "aws-transcribe"
    }

    fn rate_per_minute(&self) -> f64 {
        self.rate_per_minute
    }
}

/// Transcript text and duration (end of the last timed item) from the job output
fn parse_aws_transcript(body: &str) -> Result<SpeechTranscript> {
    let parsed: AwsTranscript = serde_json::from_str(body)
        .context("Failed to parse transcript JSON")?;

    let text = parsed
        .results
        .transcripts
        .first()
        .map(|t| t.transcript.trim().to_string())
        .unwrap_or_default();

    let duration_seconds = parsed
        .results
        .items
        .iter()
        .filter_map(|item| item.end_time.as_deref())
        .filter_map(|end| end.parse::<f64>().ok())
        .fold(None, |max: Option<f64>, end| Some(max.map_or(end, |m| m.max(end))));

    Ok(SpeechTranscript {
        text,
        duration_seconds,
        language: None,
    })
}
