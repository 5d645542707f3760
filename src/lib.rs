//! tubescribe - Transcripts, cleanups and summaries for YouTube videos, podcasts and audio files
//!
//! This library classifies incoming media URLs, acquires a transcript through an ordered
//! fallback chain (public captions, yt-dlp subtitles, paid speech-to-text), asks a
//! text-generation API for a cleaned transcript plus summary, and persists the result.

pub mod acquisition;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod output;
pub mod postprocess;
pub mod server;
pub mod store;
pub mod transcribe;
pub mod uploads;
pub mod utils;

pub use acquisition::{AcquisitionChain, Transcript, TranscriptStrategy};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use extractors::{classify, MediaSource};
pub use postprocess::{ProcessedContent, TextGenerator};
pub use store::{TranscriptionRecord, TranscriptionStatus, TranscriptionStore};
pub use transcribe::{TranscriptionPipeline, TranscriptionRequest};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Errors that reach callers of the service
#[derive(thiserror::Error, Debug)]
pub enum TranscriptorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("This media could not be transcribed: {0}")]
    NotTranscribable(String),

    #[error("Text generation service unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Text generation failed: {0}")]
    GenerationFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transcription not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TranscriptorError {
    /// Recover the typed error from an `anyhow` chain.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<TranscriptorError>() {
            Ok(typed) => typed,
            Err(other) => TranscriptorError::Internal(format!("{:#}", other)),
        }
    }
}
