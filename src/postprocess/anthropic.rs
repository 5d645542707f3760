//! Anthropic Messages API provider

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Generation, TextGenerator};
use crate::config::LlmConfig;
use crate::{Result, TranscriptorError};

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl MessagesResponse {
    fn into_generation(self) -> Generation {
        let text = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Generation {
            text,
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
            truncated: self.stop_reason.as_deref() == Some("max_tokens"),
        }
    }
}

/// Text generation through `POST /v1/messages`
pub struct AnthropicClient {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(client: Client, config: &LlmConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Rate limits, overload and server errors are worth retrying later
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    async fn generate(&self, prompt: &str) -> Result<Generation> {
        self.ensure_ready()?;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        tracing::info!(model = %self.model, prompt_chars = prompt.len(), "Requesting text generation");

        let response = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TranscriptorError::GenerationUnavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("API returned {}: {}", status, body.trim());
            return Err(if is_transient(status) {
                TranscriptorError::GenerationUnavailable(message)
            } else {
                TranscriptorError::GenerationFailed(message)
            }
            .into());
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| TranscriptorError::GenerationFailed(format!("invalid response: {}", e)))?;

        let generation = parsed.into_generation();
        tracing::debug!(
            input_tokens = generation.input_tokens,
            output_tokens = generation.output_tokens,
            truncated = generation.truncated,
            "Text generation finished"
        );

        Ok(generation)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(TranscriptorError::Config(
                "text generation API key is not configured (set ANTHROPIC_API_KEY)".to_string(),
            )
            .into());
        }
        Ok(())
    }
}
