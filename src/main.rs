use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tubescribe::cli::{Cli, Commands};
use tubescribe::config::{Config, SpeechProvider};
use tubescribe::extractors::{canonical_url, classify, AudioKind, MediaSource};
use tubescribe::postprocess::anthropic::AnthropicClient;
use tubescribe::postprocess::TextGenerator;
use tubescribe::server::{self, AppState};
use tubescribe::store::open_store;
use tubescribe::transcribe::processor::AwsTranscribeEngine;
use tubescribe::transcribe::speech::{SpeechToText, WhisperApi};
use tubescribe::uploads::UploadBroker;
use tubescribe::{output, utils, TranscriptionPipeline, TranscriptionRequest, TranscriptorError};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Serve { host, port } => {
            let config = Config::load().await?;
            warn_missing_dependencies(&config).await;

            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let addr = tokio::net::lookup_host((host.as_str(), port))
                .await
                .with_context(|| format!("Failed to resolve {}:{}", host, port))?
                .next()
                .with_context(|| format!("No address found for {}:{}", host, port))?;

            let pipeline = build_pipeline(&config).await?;
            let uploads = if config.uploads.enabled {
                Some(Arc::new(UploadBroker::new(&config).await))
            } else {
                None
            };

            tracing::info!(
                store = pipeline.store().backend(),
                tiers = ?pipeline.strategy_names(),
                uploads = uploads.is_some(),
                "Starting API server"
            );

            server::serve(
                AppState {
                    pipeline: Arc::new(pipeline),
                    uploads,
                    max_body_bytes: config.server.max_body_bytes,
                },
                addr,
            )
            .await?;
        }
        Commands::Transcribe { input, output, format } => {
            let config = Config::load().await?;
            warn_missing_dependencies(&config).await;
            let pipeline = build_pipeline(&config).await?;

            let request = match utils::local_file(&input) {
                Some(path) => TranscriptionRequest::Upload {
                    file_name: path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or(input.as_str())
                        .to_string(),
                    path,
                },
                None => TranscriptionRequest::Url(input.clone()),
            };

            tracing::info!("Starting transcription for: {}", input);

            let progress = spinner(cli.quiet);
            progress.set_message("Acquiring transcript and generating summary...");
            let result = pipeline.process(request).await;
            progress.finish_and_clear();
            let record = result?;

            match output {
                Some(path) => {
                    output::save_to_file(&record, &path, format)?;
                    println!("Transcription saved to: {}", path.display());
                }
                None => output::print_to_console(&record, format)?,
            }
        }
        Commands::List { limit, format } => {
            let config = Config::load().await?;
            let store = open_store(&config, reqwest::Client::new())?;
            let records = store.list(limit).await?;
            print!("{}", output::render_list(&records, format)?);
        }
        Commands::Delete { id } => {
            let config = Config::load().await?;
            let store = open_store(&config, reqwest::Client::new())?;
            if !store.delete(&id).await? {
                return Err(TranscriptorError::NotFound(id).into());
            }
            println!("Deleted transcription {}", id);
        }
        Commands::Classify { url } => {
            if let Some(path) = utils::local_file(&url) {
                println!("Local audio file: {}", path.display());
                return Ok(());
            }

            match classify(&url) {
                MediaSource::YouTube { video_id } => {
                    println!("YouTube video {}", style(&video_id).bold());
                    println!("  Canonical URL: {}", canonical_url(&video_id));
                }
                MediaSource::Audio { url, kind: AudioKind::DirectFile } => {
                    println!("Direct audio file: {}", url);
                }
                MediaSource::Audio { url, kind: AudioKind::PodcastPage } => {
                    println!("Podcast page (resolved with yt-dlp): {}", url);
                }
                MediaSource::Unsupported => {
                    return Err(TranscriptorError::UnsupportedUrl(url).into());
                }
            }
        }
        Commands::Config { show } => {
            let config = Config::load().await?;
            if show {
                config.display();
            } else {
                println!("Configuration file: {}", Config::config_path()?.display());
                println!("Run `tubescribe config --show` to print the current settings.");
            }
        }
        Commands::Platforms => {
            println!("Supported inputs:");
            println!("  • YouTube (youtube.com/watch, youtu.be, /embed/, /shorts/)");
            println!("  • Podcast pages (Apple Podcasts, Spotify, SoundCloud, Anchor and other hosts)");
            println!("  • Direct audio URLs (mp3, m4a, wav, flac, ogg, webm, mp4)");
            println!("  • Local audio files (transcribe command only)");
            println!();
            println!("Transcript sources, in order:");
            println!("  1. Published YouTube captions (free)");
            println!("  2. yt-dlp subtitles (free)");
            println!("  3. Speech-to-text (billed per audio minute)");
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "tubescribe=debug" } else { "tubescribe=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr so stdout stays clean for JSON output
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

/// Construct the clients for the configured providers and hand them to the pipeline
async fn build_pipeline(config: &Config) -> Result<TranscriptionPipeline> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("tubescribe/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let speech: Arc<dyn SpeechToText> = match config.speech.provider {
        SpeechProvider::Whisper => Arc::new(WhisperApi::new(http.clone(), &config.speech)),
        SpeechProvider::Aws => Arc::new(AwsTranscribeEngine::new(config, http.clone()).await),
    };
    let generator: Arc<dyn TextGenerator> = Arc::new(AnthropicClient::new(http.clone(), &config.llm));
    let store = open_store(config, http.clone())?;

    Ok(TranscriptionPipeline::new(config, http, speech, generator, store))
}

// Missing tools only disable the lower tiers, so this never aborts
async fn warn_missing_dependencies(config: &Config) {
    let missing = utils::check_dependencies(&config.acquisition.yt_dlp_path).await;
    if !missing.is_empty() {
        eprintln!("{}", style("⚠️  Dependency check warnings:").yellow());
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - captions still work without them)");
    }
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let progress = ProgressBar::new_spinner();
    if let Ok(progress_style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        progress.set_style(progress_style);
    }
    progress.enable_steady_tick(Duration::from_millis(120));
    progress
}
