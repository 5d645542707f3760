//! Persistence for transcription records.
//!
//! Every row read from or written to a backend passes through [`StoredRow`], whose
//! conversion maps missing columns to empty strings, empty lists and zeros. Callers
//! therefore never see a null field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub mod sqlite;
pub mod supabase;

pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;

use crate::config::{Config, StorageBackend};
use crate::{Result, TranscriptorError};

/// Title used when none could be discovered
pub const PLACEHOLDER_TITLE: &str = "Untitled video";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    Processing,
    Completed,
    Failed,
}

impl TranscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionStatus::Processing => "processing",
            TranscriptionStatus::Completed => "completed",
            TranscriptionStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "completed" => TranscriptionStatus::Completed,
            "failed" => TranscriptionStatus::Failed,
            _ => TranscriptionStatus::Processing,
        }
    }
}

impl std::fmt::Display for TranscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted transcription, with every field populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionRecord {
    pub id: String,
    pub created_at: String,
    pub video_url: String,
    pub video_id: String,
    pub video_title: String,
    pub video_duration: u64,
    pub raw_transcript: String,
    pub cleaned_transcript: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub transcript_method: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub processing_time_seconds: f64,
    pub status: TranscriptionStatus,
    pub error_message: String,
}

/// A record before the backend assigns `id` and `created_at`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTranscription {
    pub video_url: String,
    pub video_id: String,
    pub video_title: String,
    pub video_duration: u64,
    pub raw_transcript: String,
    pub cleaned_transcript: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub transcript_method: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub processing_time_seconds: f64,
    pub status: TranscriptionStatus,
    pub error_message: String,
}

impl NewTranscription {
    pub fn new(video_url: impl Into<String>) -> Self {
        Self {
            video_url: video_url.into(),
            video_id: String::new(),
            video_title: PLACEHOLDER_TITLE.to_string(),
            video_duration: 0,
            raw_transcript: String::new(),
            cleaned_transcript: String::new(),
            summary: String::new(),
            key_points: Vec::new(),
            transcript_method: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            processing_time_seconds: 0.0,
            status: TranscriptionStatus::Processing,
            error_message: String::new(),
        }
    }

    /// Copy with blank titles replaced and surrounding whitespace removed
    pub fn normalized(mut self) -> Self {
        self.video_title = self.video_title.trim().to_string();
        if self.video_title.is_empty() {
            self.video_title = PLACEHOLDER_TITLE.to_string();
        }
        self.key_points = self
            .key_points
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if !self.cost.is_finite() || self.cost < 0.0 {
            self.cost = 0.0;
        }
        self
    }
}

/// A row exactly as a backend returns it; any column may be missing or null
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoredRow {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub video_title: Option<String>,
    #[serde(default)]
    pub video_duration: Option<f64>,
    #[serde(default)]
    pub raw_transcript: Option<String>,
    #[serde(default)]
    pub cleaned_transcript: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// A JSON array, or the same array encoded as a string
    #[serde(default)]
    pub key_points: Option<Value>,
    #[serde(default)]
    pub transcript_method: Option<String>,
    #[serde(default)]
    pub input_tokens: Option<f64>,
    #[serde(default)]
    pub output_tokens: Option<f64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub processing_time_seconds: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl From<StoredRow> for TranscriptionRecord {
    fn from(row: StoredRow) -> Self {
        TranscriptionRecord {
            id: match row.id {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
            created_at: row.created_at.unwrap_or_default(),
            video_url: row.video_url.unwrap_or_default(),
            video_id: row.video_id.unwrap_or_default(),
            video_title: row
                .video_title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
            video_duration: non_negative(row.video_duration) as u64,
            raw_transcript: row.raw_transcript.unwrap_or_default(),
            cleaned_transcript: row.cleaned_transcript.unwrap_or_default(),
            summary: row.summary.unwrap_or_default(),
            key_points: normalize_key_points(row.key_points),
            transcript_method: row.transcript_method.unwrap_or_default(),
            input_tokens: non_negative(row.input_tokens) as u64,
            output_tokens: non_negative(row.output_tokens) as u64,
            cost: non_negative(row.cost),
            processing_time_seconds: non_negative(row.processing_time_seconds),
            status: TranscriptionStatus::parse(row.status.as_deref().unwrap_or_default()),
            error_message: row.error_message.unwrap_or_default(),
        }
    }
}

fn non_negative(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0)
}

fn normalize_key_points(value: Option<Value>) -> Vec<String> {
    let items = match value {
        Some(Value::Array(items)) => items,
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Array(items)) => items,
            _ if encoded.trim().is_empty() => Vec::new(),
            _ => vec![Value::String(encoded)],
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect()
}

/// A table of transcription records
#[async_trait]
pub trait TranscriptionStore: Send + Sync {
    async fn insert(&self, record: NewTranscription) -> Result<TranscriptionRecord>;

    /// Newest first
    async fn list(&self, limit: Option<usize>) -> Result<Vec<TranscriptionRecord>>;

    async fn get(&self, id: &str) -> Result<Option<TranscriptionRecord>>;

    /// `false` when no record had this id
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Most recent completed record for a YouTube video
    async fn find_completed(&self, video_id: &str) -> Result<Option<TranscriptionRecord>>;

    fn backend(&self) -> &'static str;
}

pub(crate) fn storage_error(err: impl std::fmt::Display) -> anyhow::Error {
    TranscriptorError::Storage(err.to_string()).into()
}

/// Open the configured backend
pub fn open_store(config: &Config, client: reqwest::Client) -> Result<Arc<dyn TranscriptionStore>> {
    match config.storage.backend {
        StorageBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&config.sqlite_path()?)?)),
        StorageBackend::Supabase => Ok(Arc::new(SupabaseStore::new(client, &config.storage)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_row_normalizes_to_defaults() {
        let row: StoredRow = serde_json::from_str(
            r#"{"id": 42, "video_title": null, "key_points": null, "summary": null, "cost": null, "status": null}"#,
        )
        .unwrap();

        let record = TranscriptionRecord::from(row);
        assert_eq!(record.id, "42");
        assert_eq!(record.video_title, PLACEHOLDER_TITLE);
        assert_eq!(record.summary, "");
        assert!(record.key_points.is_empty());
        assert_eq!(record.cost, 0.0);
        assert_eq!(record.status, TranscriptionStatus::Processing);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json["video_title"].is_string());
        assert!(json["cleaned_transcript"].is_string());
        assert!(json["key_points"].is_array());
    }

    #[test]
    fn test_key_points_accept_encoded_strings() {
        assert_eq!(
            normalize_key_points(Some(Value::String(r#"["a","b"]"#.to_string()))),
            vec!["a", "b"]
        );
        assert_eq!(normalize_key_points(Some(Value::String("single point".to_string()))), vec!["single point"]);
        assert!(normalize_key_points(Some(Value::String(String::new()))).is_empty());
        assert_eq!(normalize_key_points(Some(serde_json::json!(["x", null, 1]))), vec!["x", "1"]);
    }

    #[test]
    fn test_new_transcription_normalized() {
        let record = NewTranscription {
            video_title: "   ".to_string(),
            key_points: vec![" one ".to_string(), "".to_string()],
            cost: f64::NAN,
            ..NewTranscription::new("https://example.com/a.mp3")
        }
        .normalized();

        assert_eq!(record.video_title, PLACEHOLDER_TITLE);
        assert_eq!(record.key_points, vec!["one"]);
        assert_eq!(record.cost, 0.0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TranscriptionStatus::Completed).unwrap(), "\"completed\"");
        assert_eq!(TranscriptionStatus::parse("failed"), TranscriptionStatus::Failed);
        assert_eq!(TranscriptionStatus::Failed.to_string(), "failed");
    }
}
