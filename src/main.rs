//! Thin CLI entry point: parses arguments, sets up structured logging, and
//! drives an [`rs_torrent_client::Engine`] to completion. Kept deliberately
//! small — the CLI glue is out of scope for the detailed download-engine
//! design (see `DESIGN.md`); everything it needs is already public on
//! `Engine`.
use std::path::PathBuf;

use clap::Parser;
use rs_torrent_client::{Engine, EngineConfig};
use tracing_subscriber::EnvFilter;

/// A headless BitTorrent download engine.
#[derive(Debug, Parser)]
#[command(name = "rstc", version)]
struct Cli {
    /// Path to the `.torrent` file to download.
    torrent: PathBuf,

    /// Directory the downloaded files are written under.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// TCP port advertised to trackers and peers.
    #[arg(short, long, default_value_t = 6881)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = EngineConfig { save_path: cli.output, listen_port: cli.port, ..Default::default() };
    let engine = Engine::construct(&cli.torrent, config)?;

    let mut progress = engine.subscribe();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = *progress.borrow();
            tracing::info!(
                done = snapshot.pieces_done,
                total = snapshot.pieces_total,
                paused = snapshot.paused,
                "progress"
            );
        }
    });

    engine.start().await?;
    reporter.abort();

    Ok(())
}
