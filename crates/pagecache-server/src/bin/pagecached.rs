//! The page cache daemon.
//!
//! `pagecached` serves page-granularity GET/SET requests over a local
//! stream socket, backed by a single data file and an in-memory LRU page
//! cache.
//!
//! # Usage
//!
//! ```bash
//! # 1024 pages of 8 KiB and 256 pages of 16 KiB
//! pagecached /var/lib/pagecache/data.bin /run/pagecache.sock 1024 256
//!
//! # Load settings from a file, overriding the socket path
//! pagecached --config /etc/pagecached.toml /var/lib/pagecache/data.bin /run/alt.sock
//! ```
//!
//! SIGINT or SIGTERM triggers a graceful drain: the accept loop exits,
//! workers finish their in-flight request and join, dirty pages are
//! flushed, and the socket file is removed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pagecache_server::config::ServerConfig;
use pagecache_server::dispatcher::Dispatcher;
use pagecache_storage::engine::{CacheConfig, LruCacheEngine, PageCache};
use pagecache_storage::layout::PageSizeLayout;

/// Shared page cache daemon over a local socket.
#[derive(Parser, Debug)]
#[command(name = "pagecached", version, about = "Shared page cache daemon over a local socket")]
struct Args {
    /// Path of the backing data file (created if absent)
    #[arg(value_name = "DATA_FILE", required_unless_present = "config")]
    data_file: Option<PathBuf>,

    /// Filesystem path for the listening socket
    #[arg(value_name = "SOCKET_PATH", required_unless_present = "config")]
    socket_path: Option<PathBuf>,

    /// Page counts per size class, in 8 KiB, 16 KiB, 32 KiB, 2 MiB order
    #[arg(value_name = "COUNT")]
    page_counts: Vec<u64>,

    /// Configuration file (TOML); command-line values override it
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cap the number of resident pages
    #[arg(long, env = "PAGECACHE_CAPACITY")]
    capacity: Option<usize>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "PAGECACHE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_level.as_deref().unwrap_or("info"));

    let config = load_config(&args)?;
    run_server(config).await
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(format!(
        "pagecache_server={level},pagecache_storage={level},pagecached={level}"
    ))
    .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = if let Some(path) = &args.config {
        ServerConfig::from_file(path).context("failed to load config file")?
    } else {
        ServerConfig::new(
            args.data_file.clone().context("missing data file path")?,
            args.socket_path.clone().context("missing socket path")?,
            Vec::new(),
        )
    };

    if args.config.is_some() {
        if let Some(path) = &args.data_file {
            config.data_file = path.clone();
        }
        if let Some(path) = &args.socket_path {
            config.socket_path = path.clone();
        }
    }
    if !args.page_counts.is_empty() {
        config.page_counts = args.page_counts.clone();
    }
    if let Some(capacity) = args.capacity {
        config.capacity = Some(capacity);
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config
        .validate()
        .map_err(|message| anyhow!("invalid configuration: {message}"))?;
    Ok(config)
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let layout =
        PageSizeLayout::from_class_counts(&config.page_counts).context("invalid page layout")?;

    let mut cache_config = CacheConfig::new();
    if let Some(capacity) = config.capacity {
        cache_config = cache_config.with_capacity(capacity);
    }

    let engine = Arc::new(
        LruCacheEngine::open(&config.data_file, layout, cache_config)
            .context("failed to open the backing file")?,
    );

    let cache: Arc<dyn PageCache> = engine.clone();
    let dispatcher = Dispatcher::new(cache, &config.socket_path);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    info!(
        data_file = %config.data_file.display(),
        socket = %config.socket_path.display(),
        "starting pagecached, press Ctrl+C to stop"
    );

    dispatcher.run(shutdown_rx).await.context("server failed")?;

    let flushed = engine.flush_all();
    info!(flushed, "final flush complete");
    engine.log_hit_rate();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
