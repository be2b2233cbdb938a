//! offlinecache - command line host for the offline cache.
//!
//! Drives the cache against the real network and an on-disk store: every
//! invocation opens the store, delivers one event (a request, an install, a
//! control message, a connectivity signal or a push) and prints the outcome
//! as JSON.

mod commands;

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use offlinecache_core::CacheConfig;

/// Environment variable overriding the store directory
const CACHE_DIR_ENV: &str = "OFFLINECACHE_CACHE_DIR";

/// Log file prefix used by the daily rolling appender
const LOG_FILE_PREFIX: &str = "offlinecache.log";

#[derive(Parser, Debug)]
#[command(name = "offlinecache")]
#[command(about = "Offline-capable request cache with versioned generations")]
#[command(version)]
struct Args {
    /// Path to config file (default: $XDG_CONFIG_HOME/offlinecache/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store directory (default: $OFFLINECACHE_CACHE_DIR or the user cache dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one request through the cache
    Fetch {
        url: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Request header as `name: value`, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Request body
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Install a deployment and precache its URLs
    Install {
        version: String,
        #[arg(long = "static")]
        static_urls: Vec<String>,
        #[arg(long = "dynamic")]
        dynamic_urls: Vec<String>,
        #[arg(long = "api")]
        api_urls: Vec<String>,
        /// Deployment manifest (JSON) instead of the flags above
        #[arg(long, conflicts_with_all = ["static_urls", "dynamic_urls", "api_urls"])]
        manifest: Option<PathBuf>,
    },
    /// Deliver a raw control message, e.g. '{"type":"SKIP_WAITING"}'
    Message { json: String },
    /// Activate the waiting generation now
    SkipWaiting,
    /// Delete every generation and bucket
    Clear,
    /// Replay queued sync tasks (connectivity restored)
    Sync,
    /// Turn a push payload into a notification, optionally clicking an action
    Push {
        payload: String,
        #[arg(long)]
        action: Option<String>,
    },
    /// Show lifecycle state, generations and pending sync tasks
    Status,
}

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). The returned guard must
/// live until exit so buffered file output is flushed.
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn resolve_cache_dir(args_dir: Option<PathBuf>, config: &CacheConfig) -> Result<PathBuf> {
    if let Some(dir) = args_dir {
        return Ok(dir);
    }
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    config.cache_dir()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _log_guard = init_tracing(args.log_file.as_ref());

    let config = match &args.config {
        Some(path) => CacheConfig::load_from(path),
        None => CacheConfig::load(),
    }
    .context("Failed to load config")?;

    let cache_dir = resolve_cache_dir(args.cache_dir, &config)?;
    info!(cache_dir = %cache_dir.display(), command = ?args.command, "offlinecache starting");

    let manager = commands::open_manager(config, &cache_dir)
        .await
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;

    let output = commands::run(&manager, args.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
