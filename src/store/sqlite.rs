// Local SQLite backend

use anyhow::Context;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use super::{storage_error, NewTranscription, StoredRow, TranscriptionRecord, TranscriptionStore};
use crate::Result;

const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS transcriptions (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    video_url TEXT,
    video_id TEXT,
    video_title TEXT,
    video_duration INTEGER,
    raw_transcript TEXT,
    cleaned_transcript TEXT,
    summary TEXT,
    key_points TEXT,
    transcript_method TEXT,
    input_tokens INTEGER,
    output_tokens INTEGER,
    cost REAL,
    processing_time_seconds REAL,
    status TEXT NOT NULL DEFAULT 'processing',
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_transcriptions_video_status ON transcriptions (video_id, status);
CREATE INDEX IF NOT EXISTS idx_transcriptions_created_at ON transcriptions (created_at);
"#;

const SELECT_COLUMNS: &str = "id, created_at, video_url, video_id, video_title, video_duration, \
     raw_transcript, cleaned_transcript, summary, key_points, transcript_method, input_tokens, \
     output_tokens, cost, processing_time_seconds, status, error_message";

/// Records in a single SQLite file
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        tracing::info!("Database initialized at {}", path.display());
        Self::with_connection(conn)
    }

    /// Throwaway database that lives as long as the store
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().context("Failed to open in-memory database")?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(MIGRATIONS)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| storage_error(format!("Failed to lock database connection: {}", e)))?;
        f(&conn).map_err(storage_error)
    }

    fn query_records(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<TranscriptionRecord>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let records = stmt
                .query_map(params, read_row)?
                .map(|row| row.map(TranscriptionRecord::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        id: row.get::<_, Option<String>>("id")?.map(Value::String),
        created_at: row.get("created_at")?,
        video_url: row.get("video_url")?,
        video_id: row.get("video_id")?,
        video_title: row.get("video_title")?,
        video_duration: row.get("video_duration")?,
        raw_transcript: row.get("raw_transcript")?,
        cleaned_transcript: row.get("cleaned_transcript")?,
        summary: row.get("summary")?,
        key_points: row.get::<_, Option<String>>("key_points")?.map(Value::String),
        transcript_method: row.get("transcript_method")?,
        input_tokens: row.get("input_tokens")?,
        output_tokens: row.get("output_tokens")?,
        cost: row.get("cost")?,
        processing_time_seconds: row.get("processing_time_seconds")?,
        status: row.get("status")?,
        error_message: row.get("error_message")?,
    })
}

#[async_trait]
impl TranscriptionStore for SqliteStore {
    async fn insert(&self, record: NewTranscription) -> Result<TranscriptionRecord> {
        let record = record.normalized();
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let key_points = serde_json::to_string(&record.key_points)?;

        self.run(|conn| {
            conn.execute(
                r#"
                INSERT INTO transcriptions (
                    id, created_at, video_url, video_id, video_title, video_duration,
                    raw_transcript, cleaned_transcript, summary, key_points, transcript_method,
                    input_tokens, output_tokens, cost, processing_time_seconds, status, error_message
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                "#,
                params![
                    id,
                    created_at,
                    record.video_url,
                    record.video_id,
                    record.video_title,
                    record.video_duration as i64,
                    record.raw_transcript,
                    record.cleaned_transcript,
                    record.summary,
                    key_points,
                    record.transcript_method,
                    record.input_tokens as i64,
                    record.output_tokens as i64,
                    record.cost,
                    record.processing_time_seconds,
                    record.status.as_str(),
                    record.error_message,
                ],
            )
        })?;

        tracing::debug!(id = %id, status = %record.status, "Inserted transcription");

        self.get(&id)
            .await?
            .ok_or_else(|| storage_error(format!("inserted record {} could not be read back", id)))
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<TranscriptionRecord>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        self.query_records(
            &format!(
                "SELECT {} FROM transcriptions ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                SELECT_COLUMNS
            ),
            &[&limit],
        )
    }

    async fn get(&self, id: &str) -> Result<Option<TranscriptionRecord>> {
        let sql = format!("SELECT {} FROM transcriptions WHERE id = ?1", SELECT_COLUMNS);
        let row = self.run(|conn| conn.query_row(&sql, params![id], read_row).optional())?;
        Ok(row.map(TranscriptionRecord::from))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let deleted = self.run(|conn| conn.execute("DELETE FROM transcriptions WHERE id = ?1", params![id]))?;
        Ok(deleted > 0)
    }

    async fn find_completed(&self, video_id: &str) -> Result<Option<TranscriptionRecord>> {
        let records = self.query_records(
            &format!(
                "SELECT {} FROM transcriptions WHERE video_id = ?1 AND status = 'completed' \
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                SELECT_COLUMNS
            ),
            &[&video_id],
        )?;
        Ok(records.into_iter().next())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{TranscriptionStatus, PLACEHOLDER_TITLE};

    fn completed(video_id: &str) -> NewTranscription {
        NewTranscription {
            video_id: video_id.to_string(),
            video_title: "Never Gonna Give You Up".to_string(),
            video_duration: 212,
            raw_transcript: "raw".to_string(),
            cleaned_transcript: "Raw.".to_string(),
            summary: "A song.".to_string(),
            key_points: vec!["Commitment".to_string()],
            transcript_method: "youtube-captions".to_string(),
            input_tokens: 10,
            output_tokens: 5,
            cost: 0.0001,
            processing_time_seconds: 1.5,
            status: TranscriptionStatus::Completed,
            ..NewTranscription::new(format!("https://www.youtube.com/watch?v={}", video_id))
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteStore::in_memory().unwrap();
        let record = store.insert(completed("dQw4w9WgXcQ")).await.unwrap();

        assert!(!record.id.is_empty());
        assert!(!record.created_at.is_empty());
        assert_eq!(record.key_points, vec!["Commitment"]);
        assert_eq!(record.video_duration, 212);
        assert_eq!(record.status, TranscriptionStatus::Completed);

        let fetched = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_limited() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.insert(completed("aaaaaaaaaaa")).await.unwrap();
        let second = store.insert(completed("bbbbbbbbbbb")).await.unwrap();
        let third = store.insert(completed("ccccccccccc")).await.unwrap();

        let all = store.list(None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);

        assert_eq!(store.list(Some(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_from_list() {
        let store = SqliteStore::in_memory().unwrap();
        let record = store.insert(completed("dQw4w9WgXcQ")).await.unwrap();

        assert!(store.delete(&record.id).await.unwrap());
        assert!(!store.delete(&record.id).await.unwrap());
        assert!(store.list(None).await.unwrap().iter().all(|r| r.id != record.id));
    }

    #[tokio::test]
    async fn test_find_completed_ignores_failures() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert(NewTranscription {
                video_id: "dQw4w9WgXcQ".to_string(),
                status: TranscriptionStatus::Failed,
                error_message: "all tiers failed".to_string(),
                ..NewTranscription::new("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            })
            .await
            .unwrap();

        assert!(store.find_completed("dQw4w9WgXcQ").await.unwrap().is_none());

        let done = store.insert(completed("dQw4w9WgXcQ")).await.unwrap();
        assert_eq!(store.find_completed("dQw4w9WgXcQ").await.unwrap().unwrap().id, done.id);
    }

    #[tokio::test]
    async fn test_null_columns_read_as_defaults() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .run(|conn| {
                conn.execute(
                    "INSERT INTO transcriptions (id, created_at, status) VALUES ('legacy', '2024-01-01T00:00:00.000Z', 'completed')",
                    [],
                )
            })
            .unwrap();

        let record = store.get("legacy").await.unwrap().unwrap();
        assert_eq!(record.video_title, PLACEHOLDER_TITLE);
        assert_eq!(record.raw_transcript, "");
        assert!(record.key_points.is_empty());
        assert_eq!(record.input_tokens, 0);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tubescribe.db");

        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert(NewTranscription::new("https://cdn.example.com/ep1.mp3"))
                .await
                .unwrap()
                .id
        };

        let reopened = SqliteStore::open(&path).unwrap();
        let record = reopened.get(&id).await.unwrap().unwrap();
        assert_eq!(record.video_title, PLACEHOLDER_TITLE);
        assert_eq!(reopened.backend(), "sqlite");
    }
}
