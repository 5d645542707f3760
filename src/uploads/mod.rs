//! Pre-signed object-storage uploads.
//!
//! Browsers upload large audio files straight to S3 with the returned `uploadUrl`, then
//! submit `publicUrl` to `POST /transcribe` like any other direct audio link.

use anyhow::Context;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::extractors::AudioFormat;
use crate::{Result, TranscriptorError};

/// Where to PUT the file and where it can be read afterwards
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    pub upload_url: String,
    pub public_url: String,
    pub key: String,
    pub expires_in_secs: u64,
}

pub struct UploadBroker {
    s3_client: S3Client,
    bucket: String,
    region: String,
    key_prefix: String,
    public_base_url: Option<String>,
    expires_in: Duration,
}

impl UploadBroker {
    pub async fn new(config: &Config) -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(config.uploads_region())
            .load()
            .await;

        Self {
            s3_client: S3Client::new(&aws_config),
            bucket: config.uploads.s3_bucket.clone(),
            region: config.uploads.region.clone(),
            key_prefix: config.uploads.key_prefix.clone(),
            public_base_url: config
                .uploads
                .public_base_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            expires_in: Duration::from_secs(config.uploads.expires_in_secs),
        }
    }

    /// Issue a pre-signed PUT for an audio file
    pub async fn presign(&self, file_name: &str, content_type: Option<&str>) -> Result<PresignedUpload> {
        let format = AudioFormat::from_path(Path::new(file_name)).ok_or_else(|| {
            TranscriptorError::InvalidRequest(format!("{} is not a supported audio file", file_name))
        })?;

        let key = object_key(&self.key_prefix, file_name);
        let content_type = content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(format.mime_type());

        let presigned = self
            .s3_client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .presigned(PresigningConfig::expires_in(self.expires_in).context("Invalid upload expiry")?)
            .await
            .context("Failed to pre-sign upload")?;

        tracing::info!(key = %key, "Issued pre-signed upload");

        Ok(PresignedUpload {
            upload_url: presigned.uri().to_string(),
            public_url: public_url(self.public_base_url.as_deref(), &self.bucket, &self.region, &key),
            key,
            expires_in_secs: self.expires_in.as_secs(),
        })
    }
}

/// `<prefix><uuid>-<sanitized file name>`
fn object_key(prefix: &str, file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_name);

    let sanitized: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '-' })
        .collect();

    format!("{}{}-{}", prefix, Uuid::new_v4(), sanitized)
}

fn public_url(base: Option<&str>, bucket: &str, region: &str, key: &str) -> String {
    match base {
        Some(base) => format!("{}/{}", base, key),
        None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_is_prefixed_and_sanitized() {
        let key = object_key("uploads/", "../My Episode #3.mp3");
        assert!(key.starts_with("uploads/"));
        assert!(key.ends_with("-My-Episode--3.mp3"));
        assert!(!key.contains(".."));
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            public_url(None, "media", "eu-west-1", "uploads/a.mp3"),
            "https://media.s3.eu-west-1.amazonaws.com/uploads/a.mp3"
        );
        assert_eq!(
            public_url(Some("https://cdn.example.com"), "media", "eu-west-1", "uploads/a.mp3"),
            "https://cdn.example.com/uploads/a.mp3"
        );
    }

    #[tokio::test]
    async fn test_rejects_non_audio_files() {
        let broker = UploadBroker::new(&Config::default()).await;
        let err = broker.presign("notes.pdf", None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TranscriptorError>(),
            Some(TranscriptorError::InvalidRequest(_))
        ));
    }
}
