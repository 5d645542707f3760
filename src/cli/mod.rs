use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tubescribe",
    about = "Transcribe, clean up and summarize YouTube videos, podcasts and audio files",
    version,
    long_about = "Acquires a transcript through public captions, yt-dlp subtitles or paid speech-to-text (in that order), \
                  cleans it up and summarizes it with a text-generation API, and stores the result. \
                  Run `serve` for the HTTP API or use the one-shot commands directly."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "TUBESCRIBE_JSON_LOGS")]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to bind (defaults to server.host from the config)
        #[arg(long, env = "TUBESCRIBE_HOST")]
        host: Option<String>,

        /// Port to listen on (defaults to server.port from the config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Transcribe a URL or local audio file and store the result
    Transcribe {
        /// YouTube URL, podcast/audio URL, or path to a local audio file
        #[arg(value_name = "URL_OR_FILE")]
        input: String,

        /// Output file path (prints to console if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List stored transcriptions, newest first
    List {
        /// Maximum number of records to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a stored transcription
    Delete {
        /// Record identifier
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Show how an input would be handled without fetching anything
    Classify {
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Show or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// List supported platforms
    Platforms,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary, key points and transcript
    Text,
    /// The stored record as JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
