use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use chain_sync::config::Config;
use chain_sync::sources::{EthersBlockSource, SubgraphPriceSource};
use chain_sync::store::SyncStore;
use chain_sync::sync::{SyncCoordinator, VisibilityGate};
use chain_sync::utils;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    utils::logger::init_logger("info");
    info!("Starting chain state updater");

    // Load configuration
    let config = Config::load()?;
    utils::config_logger::log_config(&config);

    let block_source = EthersBlockSource::new(config.network_endpoints()?)
        .with_retry_policy(config.retry_policy())
        .with_polling_interval(config.polling_interval()?);
    let price_source = Arc::new(
        SubgraphPriceSource::from_config(&config).context("Failed to create price source")?,
    );
    let store = Arc::new(SyncStore::new());

    let sync_config = config.sync_config()?;
    let poller = CancellationToken::new();
    let gate = match config.pause_file.clone() {
        Some(path) => {
            info!("Sync pauses while {} exists", path);
            VisibilityGate::polled(
                move || Some(!Path::new(&path).exists()),
                sync_config.visibility_poll_interval,
                poller.clone(),
            )
        }
        None => VisibilityGate::always_visible(),
    };

    let coordinator = SyncCoordinator::new(
        sync_config,
        config.network_id(),
        Arc::new(block_source),
        price_source.clone(),
        price_source,
        store.clone(),
    )?
    .with_visibility(gate);
    let handle = coordinator.handle();
    let task = coordinator.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    handle.shutdown();
    poller.cancel();

    match task.await {
        Ok(()) => info!("Updater shutdown gracefully"),
        Err(e) => error!("Updater task failed: {}", e),
    }

    let snapshot = store.snapshot().await;
    info!("Final state: {}", serde_json::to_string(&snapshot)?);
    Ok(())
}
