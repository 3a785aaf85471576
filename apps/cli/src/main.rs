//! parget - command-line segmented download accelerator
//!
//! One positional URL; flags tune segment/chunk concurrency, the bandwidth
//! ceiling and the user speed limit.

mod progress;

use anyhow::Result;
use clap::Parser;
use parget_core::Downloader;
use parget_types::EngineConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Multi-connection HTTP download accelerator
#[derive(Parser)]
#[command(name = "parget")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// URL of the resource to download
    url: String,

    /// Maximum segments downloading concurrently
    #[arg(long, default_value_t = 20)]
    segments: usize,

    /// Maximum chunk workers per segment
    #[arg(long, default_value_t = 2)]
    chunks: usize,

    /// Upper bound on a single chunk, in bytes
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Hard bandwidth ceiling, bytes/sec
    #[arg(long)]
    bandwidth: Option<u64>,

    /// User speed limit, bytes/sec
    #[arg(short, long)]
    limit: Option<u64>,

    /// Root folder for finished downloads
    #[arg(long, env = "PARGET_DOWNLOAD_ROOT")]
    download_root: Option<PathBuf>,

    /// Root folder for in-flight temp state
    #[arg(long, env = "PARGET_TEMP_ROOT")]
    temp_root: Option<PathBuf>,

    /// Give up after this many seconds
    #[arg(long)]
    deadline: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let download_root = self
            .download_root
            .clone()
            .unwrap_or_else(|| defaults.download_root.clone());
        let temp_root = self
            .temp_root
            .clone()
            .unwrap_or_else(|| download_root.join(".temp"));
        EngineConfig {
            max_concurrent_segments: self.segments,
            max_concurrent_chunks: self.chunks,
            max_chunk_size: self.chunk_size.unwrap_or(defaults.max_chunk_size),
            max_bandwidth: self.bandwidth.unwrap_or(defaults.max_bandwidth),
            max_download_speed: self.limit,
            download_deadline: self.deadline.map(Duration::from_secs),
            download_root,
            temp_root,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "parget_core=debug,parget_cli=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let downloader = Downloader::create(&cli.url, cli.engine_config()).await?;

    // ctrl-c aborts cleanly and leaves resumable state behind
    let cancel = downloader.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let renderer = progress::render(downloader.resource(), downloader.subscribe());

    let result = downloader.start().await;
    let _ = renderer.await;

    let path = result?;
    println!(
        "{} saved to {}",
        console::style("✓").green().bold(),
        path.display()
    );
    Ok(())
}
