//! Warden Daemon - supervises privileged commands with undo support
//!
//! Classifies, backs up, executes and audits commands proposed through the
//! engine API.

use anyhow::Result;
use std::path::Path;
use tracing::{info, warn, Level};
use wardend::Engine;
use warden_common::config::{WardenConfig, CONFIG_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Warden Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    // Optional config path override: `wardend /path/to/config.toml`
    let config_path = std::env::args().nth(1);
    let config = match config_path {
        Some(path) => WardenConfig::load(Path::new(&path))?,
        None => WardenConfig::load(Path::new(CONFIG_PATH))?,
    };

    let engine = Engine::new(config)?;

    // Detect a crash between "executed" and "logged" from a previous run
    let orphans = engine.reconcile().await?;
    if !orphans.is_empty() {
        warn!(
            "{} backup(s) are referenced by no change record; a previous run may have crashed mid-execution",
            orphans.len()
        );
    }

    info!("Warden Daemon ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down gracefully");

    Ok(())
}
