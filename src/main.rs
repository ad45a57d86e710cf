//! Media ingestion command line tool
//!
//! Probes one file, extracts audio, sampled frames and transcript input
//! concurrently and prints a JSON summary. With `--chunked` the file is
//! walked in memory-bounded chunks instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_ingest::config_file::ConfigFile;
use media_ingest::{
    Component, ExtractOptions, IngestConfig, IngestError, MediaHandle, Orchestrator, Result, SystemMemoryMonitor,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "media-ingest";

/// Default config file looked up in the working directory
const DEFAULT_CONFIG: &str = "config.toml";

#[derive(Parser, Debug)]
#[command(name = "media-ingest")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Media file to ingest
    file: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between sampled frames, overrides the config
    #[arg(short, long)]
    interval: Option<f64>,

    /// Walk the file in memory-bounded chunks
    #[arg(long)]
    chunked: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, json_from_file) = load_config(args.config.as_deref())?;
    init_logging(&config.log_level, args.json_logs || json_from_file);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    media_ingest::init()?;
    tracing::info!("FFmpeg version: {}", media_ingest::ffmpeg_version_info());
    tracing::debug!("Configuration loaded: {:?}", config);

    let orchestrator = Orchestrator::from_config(&config)?;
    let handle = Arc::new(MediaHandle::new(&args.file));

    if args.chunked {
        run_chunked(orchestrator, config, handle, args.interval).await
    } else {
        run_extract(&orchestrator, handle, args.interval).await
    }
}

/// Load the explicit config file, or `config.toml` when present, or defaults.
fn load_config(path: Option<&Path>) -> Result<(IngestConfig, bool)> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG).exists() => PathBuf::from(DEFAULT_CONFIG),
        None => return Ok((IngestConfig::default(), false)),
    };
    let file = ConfigFile::from_file(&path)?;
    let json = file.json_logs();
    Ok((file.into_ingest_config()?, json))
}

/// Initialize logging with tracing
fn init_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("media_ingest={}", level).into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run_extract(orchestrator: &Orchestrator, handle: Arc<MediaHandle>, interval: Option<f64>) -> Result<()> {
    let options = ExtractOptions {
        frame_interval_secs: interval,
        ..ExtractOptions::default()
    };
    let result = orchestrator.extract_all_with(handle.clone(), options).await?;

    let summary = json!({
        "id": result.handle_id.to_string(),
        "path": handle.path().display().to_string(),
        "metadata": result.metadata,
        "audio": component_summary(&result.audio, |a| json!({
            "samples": a.len(),
            "sample_rate": a.sample_rate,
            "channels": a.channels,
            "duration_secs": a.duration_secs(),
        })),
        "frames": component_summary(&result.frames, |frames| json!({
            "count": frames.len(),
            "first_index": frames.first().map(|f| f.index),
            "last_index": frames.last().map(|f| f.index),
        })),
        "transcript": component_summary(&result.transcript, |t| json!({
            "samples": t.audio.len(),
            "sample_rate": t.audio.sample_rate,
        })),
    });
    println!("{:#}", summary);
    Ok(())
}

async fn run_chunked(
    orchestrator: Orchestrator,
    config: IngestConfig,
    handle: Arc<MediaHandle>,
    interval: Option<f64>,
) -> Result<()> {
    let mut processor = orchestrator.chunk_processor(Arc::new(SystemMemoryMonitor::new()), &config);
    if let Some(interval) = interval {
        processor = processor.with_frame_interval(interval);
    }
    let chunk_duration = config.memory.chunk_duration_secs;

    // Chunk iteration drives blocking decodes; keep it off the async workers.
    tokio::task::spawn_blocking(move || -> Result<()> {
        for chunk in processor.iterate_chunks(&handle, chunk_duration)? {
            let chunk = chunk?;
            let usage = processor.memory_usage();
            println!(
                "{}",
                json!({
                    "index": chunk.index,
                    "start_secs": chunk.start_secs,
                    "duration_secs": chunk.duration_secs,
                    "frames": chunk.frames.len(),
                    "samples": chunk.audio.len(),
                    "memory_used_percent": usage.used_percent,
                })
            );
        }
        Ok(())
    })
    .await
    .map_err(|e| IngestError::TaskPanicked(e.to_string()))?
}

fn component_summary<T>(component: &Component<T>, ready: impl FnOnce(&T) -> serde_json::Value) -> serde_json::Value {
    match component {
        Component::Ready(value) => {
            let mut summary = ready(value);
            summary["status"] = json!("ready");
            summary
        }
        Component::Failed(failure) => json!({
            "status": "failed",
            "kind": failure.error.kind(),
            "error": failure.error.to_string(),
        }),
    }
}
