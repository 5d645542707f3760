use anyhow::{Context, Result};
use aws_types::region::Region;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Transcript acquisition chain settings
    pub acquisition: AcquisitionConfig,

    /// Speech-to-text engine settings
    pub speech: SpeechConfig,

    /// Text-generation (cleanup and summary) settings
    pub llm: LlmConfig,

    /// Persistence backend
    pub storage: StorageConfig,

    /// Object storage for uploaded audio
    pub uploads: UploadsConfig,

    /// Duplicate detection
    pub cache: CacheConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body in bytes (multipart uploads included)
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Transcripts shorter than this (trimmed, in characters) fall through to the next tier
    pub min_transcript_chars: usize,

    /// Caption languages tried in order before auto-detect
    pub caption_languages: Vec<String>,

    /// Path or name of the yt-dlp executable
    pub yt_dlp_path: String,

    /// Upper bound for extracted or downloaded audio
    pub max_audio_bytes: u64,

    pub caption_timeout_secs: u64,
    pub subtitle_timeout_secs: u64,
    pub audio_timeout_secs: u64,

    /// Fetch title and duration for YouTube videos after the transcript is acquired
    pub lookup_metadata: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeechProvider {
    /// OpenAI-compatible `/audio/transcriptions` endpoint
    Whisper,
    /// AWS Transcribe batch jobs via S3
    Aws,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub provider: SpeechProvider,

    /// API key for the Whisper endpoint (overridden by `OPENAI_API_KEY`)
    pub api_key: Option<String>,

    pub endpoint: String,
    pub model: String,

    /// Billing rate in dollars per audio minute
    pub rate_per_minute: f64,

    pub timeout_secs: u64,

    /// AWS settings, used when `provider` is `aws`
    pub aws: AwsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// AWS region
    pub region: String,

    /// S3 bucket for temporary audio storage
    pub s3_bucket: String,

    /// Optional S3 key prefix
    pub s3_key_prefix: Option<String>,

    /// Default language code (auto-detect if not specified)
    pub default_language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key (overridden by `ANTHROPIC_API_KEY`)
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,

    /// Dollars per million input tokens
    pub input_rate_per_million: f64,

    /// Dollars per million output tokens
    pub output_rate_per_million: f64,

    /// Transcripts are truncated to this many characters before prompting, further capped
    /// by what `max_tokens` can echo back (see [`LlmConfig::transcript_char_budget`])
    pub max_transcript_chars: usize,

    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    Sqlite,
    Supabase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// SQLite database file (defaults to the data directory)
    pub sqlite_path: Option<PathBuf>,

    /// Supabase project URL (overridden by `SUPABASE_URL`)
    pub supabase_url: Option<String>,

    /// Supabase service key (overridden by `SUPABASE_SERVICE_ROLE_KEY`)
    pub supabase_key: Option<String>,

    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    pub enabled: bool,
    pub region: String,
    pub s3_bucket: String,
    pub key_prefix: String,

    /// Public base URL of the bucket (CDN or website endpoint)
    pub public_base_url: Option<String>,

    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Return an existing completed record for the same video instead of reprocessing
    pub reuse_completed: bool,

    /// Persist a `failed` record when acquisition fails
    pub record_failures: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Temporary directory for downloads
    pub temp_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: 30 * 1024 * 1024,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            min_transcript_chars: 100,
            caption_languages: vec!["en".to_string(), "en-US".to_string(), "en-GB".to_string()],
            yt_dlp_path: "yt-dlp".to_string(),
            max_audio_bytes: 25 * 1024 * 1024,
            caption_timeout_secs: 20,
            subtitle_timeout_secs: 90,
            audio_timeout_secs: 300,
            lookup_metadata: true,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            provider: SpeechProvider::Whisper,
            api_key: None,
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            rate_per_minute: 0.006,
            timeout_secs: 600,
            aws: AwsConfig::default(),
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            s3_bucket: "".to_string(),
            s3_key_prefix: Some("tubescribe/".to_string()),
            default_language: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.anthropic.com/v1".to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            max_tokens: 8192,
            input_rate_per_million: 3.0,
            output_rate_per_million: 15.0,
            max_transcript_chars: 24_000,
            timeout_secs: 180,
        }
    }
}

/// Conservative characters per output token for English prose
const REPLY_CHARS_PER_TOKEN: usize = 3;

impl LlmConfig {
    /// Transcript characters sent to the generator. The reply repeats the cleaned transcript,
    /// so the input is capped at what fits in `max_tokens` of output.
    pub fn transcript_char_budget(&self) -> usize {
        self.max_transcript_chars
            .min(self.max_tokens as usize * REPLY_CHARS_PER_TOKEN)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            sqlite_path: None,
            supabase_url: None,
            supabase_key: None,
            table: "transcriptions".to_string(),
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            region: "us-east-1".to_string(),
            s3_bucket: "".to_string(),
            key_prefix: "uploads/".to_string(),
            public_base_url: None,
            expires_in_secs: 900,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reuse_completed: true,
            record_failures: false,
        }
    }
}

impl Config {
    /// Load configuration from file or create default, then apply environment overrides
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            serde_yaml::from_str::<Config>(&content)
                .context("Failed to parse config file")?
        } else {
            let config = Self::default();
            config.save().await?;
            config
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("tubescribe").join("config.yaml"))
    }

    /// Override secrets and the port from environment variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.speech.api_key = Some(key);
        }
        if let Some(key) = non_empty("ANTHROPIC_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = non_empty("SUPABASE_URL") {
            self.storage.supabase_url = Some(url);
        }
        if let Some(key) = non_empty("SUPABASE_SERVICE_ROLE_KEY") {
            self.storage.supabase_key = Some(key);
        }
        if let Some(port) = non_empty("TUBESCRIBE_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.acquisition.min_transcript_chars == 0 {
            anyhow::bail!("acquisition.min_transcript_chars must be greater than zero");
        }

        if self.acquisition.max_audio_bytes == 0 {
            anyhow::bail!("acquisition.max_audio_bytes must be greater than zero");
        }

        if self.llm.max_tokens == 0 {
            anyhow::bail!("llm.max_tokens must be greater than zero");
        }

        if self.speech.provider == SpeechProvider::Aws && self.speech.aws.s3_bucket.is_empty() {
            anyhow::bail!("speech.aws.s3_bucket must be configured for the AWS speech provider");
        }

        if self.uploads.enabled && self.uploads.s3_bucket.is_empty() {
            anyhow::bail!("uploads.s3_bucket must be configured when uploads are enabled");
        }

        if self.storage.backend == StorageBackend::Supabase {
            let url = self.storage.supabase_url.as_deref().unwrap_or("");
            if url.is_empty() {
                anyhow::bail!("storage.supabase_url (or SUPABASE_URL) must be configured");
            }
            url::Url::parse(url).context("storage.supabase_url is not a valid URL")?;
        }

        Ok(())
    }

    /// SQLite file, defaulting to the platform data directory
    pub fn sqlite_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.sqlite_path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir()
            .context("Could not determine data directory")?;

        Ok(data_dir.join("tubescribe").join("transcriptions.db"))
    }

    /// Display current configuration with secrets masked
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Server: {}:{}", self.server.host, self.server.port);
        println!("  Min transcript chars: {}", self.acquisition.min_transcript_chars);
        println!("  Caption languages: {}", self.acquisition.caption_languages.join(", "));
        println!("  yt-dlp: {}", self.acquisition.yt_dlp_path);
        println!("  Max audio size: {}", crate::utils::format_file_size(self.acquisition.max_audio_bytes));
        println!("  Speech provider: {:?} (${}/min)", self.speech.provider, self.speech.rate_per_minute);
        println!("  Speech API key: {}", mask_secret(self.speech.api_key.as_deref()));
        println!("  LLM model: {}", self.llm.model);
        println!("  LLM API key: {}", mask_secret(self.llm.api_key.as_deref()));
        println!("  Storage: {:?}", self.storage.backend);
        if let Some(url) = &self.storage.supabase_url {
            println!("  Supabase URL: {}", url);
        }
        println!("  Uploads enabled: {}", self.uploads.enabled);
        if self.uploads.enabled {
            println!("  Upload bucket: {}", self.uploads.s3_bucket);
        }
        println!("  Reuse completed: {}", self.cache.reuse_completed);
    }

    /// Get AWS region for the speech engine
    pub fn aws_region(&self) -> Region {
        Region::new(self.speech.aws.region.clone())
    }

    /// Get AWS region for the upload bucket
    pub fn uploads_region(&self) -> Region {
        Region::new(self.uploads.region.clone())
    }
}

/// Show only the last four characters of a secret
pub fn mask_secret(secret: Option<&str>) -> String {
    match secret {
        None | Some("") => "(not set)".to_string(),
        Some(s) if s.chars().count() <= 4 => "****".to_string(),
        Some(s) => {
            let tail: String = s.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("****{}", tail)
        }
    }
}
