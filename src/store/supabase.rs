// Hosted PostgREST backend (Supabase)

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};

use super::{storage_error, NewTranscription, StoredRow, TranscriptionRecord, TranscriptionStore};
use crate::config::StorageConfig;
use crate::Result;

/// Records in a Supabase table, reached through its REST interface
pub struct SupabaseStore {
    client: Client,
    table_url: String,
    key: String,
}

impl SupabaseStore {
    pub fn new(client: Client, config: &StorageConfig) -> Result<Self> {
        let base = config
            .supabase_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .ok_or_else(|| crate::TranscriptorError::Config("storage.supabase_url is not set".to_string()))?;
        let key = config
            .supabase_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| crate::TranscriptorError::Config("storage.supabase_key is not set".to_string()))?;

        Ok(Self {
            client,
            table_url: format!("{}/rest/v1/{}", base, config.table),
            key,
        })
    }

    fn url(&self, query: &[(&str, String)]) -> String {
        if query.is_empty() {
            return self.table_url.clone();
        }

        let query = query
            .iter()
            .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.table_url, query)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn rows(response: std::result::Result<Response, reqwest::Error>) -> Result<Vec<TranscriptionRecord>> {
        let response = response.map_err(|e| storage_error(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(storage_error(format!("database returned {}: {}", status, body.trim())));
        }

        let rows: Vec<StoredRow> = response
            .json()
            .await
            .map_err(|e| storage_error(format!("invalid response: {}", e)))?;

        Ok(rows.into_iter().map(TranscriptionRecord::from).collect())
    }

    async fn select(&self, query: &[(&str, String)]) -> Result<Vec<TranscriptionRecord>> {
        let mut params = vec![("select", "*".to_string())];
        params.extend(query.iter().cloned());

        Self::rows(self.authorized(self.client.get(self.url(&params))).send().await).await
    }
}

#[async_trait]
impl TranscriptionStore for SupabaseStore {
    async fn insert(&self, record: NewTranscription) -> Result<TranscriptionRecord> {
        let record = record.normalized();

        let response = self
            .authorized(self.client.post(self.url(&[])))
            .header("Prefer", "return=representation")
            .json(&record)
            .send()
            .await;

        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| storage_error("insert returned no row"))
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<TranscriptionRecord>> {
        let mut query = vec![("order", "created_at.desc".to_string())];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.select(&query).await
    }

    async fn get(&self, id: &str) -> Result<Option<TranscriptionRecord>> {
        let records = self
            .select(&[("id", format!("eq.{}", id)), ("limit", "1".to_string())])
            .await?;
        Ok(records.into_iter().next())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let response = self
            .authorized(self.client.delete(self.url(&[("id", format!("eq.{}", id))])))
            .header("Prefer", "return=representation")
            .send()
            .await;

        Ok(!Self::rows(response).await?.is_empty())
    }

    async fn find_completed(&self, video_id: &str) -> Result<Option<TranscriptionRecord>> {
        let records = self
            .select(&[
                ("video_id", format!("eq.{}", video_id)),
                ("status", "eq.completed".to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", "1".to_string()),
            ])
            .await?;
        Ok(records.into_iter().next())
    }

    fn backend(&self) -> &'static str {
        "supabase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SupabaseStore {
        let config = StorageConfig {
            supabase_url: Some("https://abc.supabase.co/".to_string()),
            supabase_key: Some("service-role".to_string()),
            ..StorageConfig::default()
        };
        SupabaseStore::new(Client::new(), &config).unwrap()
    }

    #[test]
    fn test_table_url_and_filters() {
        let store = store();
        assert_eq!(store.url(&[]), "https://abc.supabase.co/rest/v1/transcriptions");
        assert_eq!(
            store.url(&[("id", "eq.a b&c".to_string()), ("limit", "1".to_string())]),
            "https://abc.supabase.co/rest/v1/transcriptions?id=eq.a%20b%26c&limit=1"
        );
    }

    #[test]
    fn test_missing_credentials_are_config_errors() {
        let err = SupabaseStore::new(Client::new(), &StorageConfig::default()).err().unwrap();
        assert!(err.to_string().contains("supabase_url"));

        let config = StorageConfig {
            supabase_url: Some("https://abc.supabase.co".to_string()),
            ..StorageConfig::default()
        };
        let err = SupabaseStore::new(Client::new(), &config).err().unwrap();
        assert!(err.to_string().contains("supabase_key"));
    }

    #[test]
    fn test_postgrest_rows_normalize() {
        let body = r#"[{"id": "4f1c", "created_at": "2024-05-01T10:00:00+00:00", "video_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                        "video_title": null, "key_points": ["a"], "cost": 0.06, "status": "completed"}]"#;
        let rows: Vec<StoredRow> = serde_json::from_str(body).unwrap();
        let record = TranscriptionRecord::from(rows.into_iter().next().unwrap());

        assert_eq!(record.id, "4f1c");
        assert_eq!(record.video_title, crate::store::PLACEHOLDER_TITLE);
        assert_eq!(record.key_points, vec!["a"]);
        assert_eq!(store().backend(), "supabase");
    }
}
