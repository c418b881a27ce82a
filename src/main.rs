// Binary entry point - import modules directly
mod cli;
mod config;
mod graph;
mod logging;
mod store;
mod sync;
mod utils;
mod workbook;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use cli::Cli;
use config::{Config, RunStamps};
use graph::GraphClient;
use store::ReportStore;
use sync::SyncEngine;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug);
    debug!("running...");

    if cli.store {
        debug!("--store is reserved and currently has no effect");
    }

    if cli.config.is_none() {
        Config::ensure_config_exists()?;
    }

    let config = if let Some(config_path) = &cli.config {
        Config::load_custom(config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?
    } else {
        Config::load().with_context(|| {
            format!(
                "Failed to load configuration from {}",
                Config::config_file_path().display()
            )
        })?
    };

    let stamps = RunStamps::capture();
    info!("mirror run starting at {}", stamps.timestamp);

    let client = GraphClient::connect(&config)
        .await
        .context("Could not access the Graph API")?;
    debug!("after initializing account");

    let sharepoint = &config.sharepoint;

    let source_drive = client
        .default_drive_id(&sharepoint.host, &sharepoint.source_site)
        .await
        .with_context(|| format!("Failed to resolve source site '{}'", sharepoint.source_site))?;
    let source_root = client
        .get_by_path(&source_drive, &sharepoint.source_path)
        .await
        .with_context(|| format!("Failed to resolve source path '{}'", sharepoint.source_path))?;
    debug!(
        "source_folder '{}' is_folder {}",
        source_root.name, source_root.is_folder
    );

    let dest_drive = client
        .default_drive_id(&sharepoint.host, &sharepoint.dest_site)
        .await
        .with_context(|| format!("Failed to resolve destination site '{}'", sharepoint.dest_site))?;
    let dest_root = client
        .get_by_path(&dest_drive, &sharepoint.dest_path)
        .await
        .with_context(|| format!("Failed to resolve destination path '{}'", sharepoint.dest_path))?;

    let engine = SyncEngine::new(&client)?;
    let summary = engine.run(&source_root, &dest_root).await?;

    println!(
        "✅ Mirrored {} report folder(s): {} normalized, {} copied, {} skipped, {} failed",
        summary.folders_processed,
        summary.items_normalized,
        summary.items_copied,
        summary.items_skipped,
        summary.items_failed
    );

    Ok(())
}
