use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use chain_sync::config::Config;
use chain_sync::models::PriceQuote;
use chain_sync::sources::{EthersBlockSource, SubgraphPriceSource};
use chain_sync::store::{StateChange, SyncStore};
use chain_sync::sync::SyncCoordinator;
use chain_sync::utils;

#[tokio::main]
async fn main() -> Result<()> {
    utils::logger::init_logger("warn");

    // Print banner
    println!("{}", "=".repeat(80).bright_blue());
    println!("{}", "CHAIN STATE WATCHER".bold().bright_green());
    println!("{}", "Block height and reference prices, as committed".bright_cyan());
    println!("{}", "=".repeat(80).bright_blue());
    println!();

    let config = Config::load()?;

    let store = Arc::new(SyncStore::new());
    let mut changes = store.subscribe();

    let price_source = Arc::new(
        SubgraphPriceSource::from_config(&config).context("Failed to create price source")?,
    );
    let coordinator = SyncCoordinator::new(
        config.sync_config()?,
        config.network_id(),
        Arc::new(
            EthersBlockSource::new(config.network_endpoints()?)
                .with_retry_policy(config.retry_policy())
                .with_polling_interval(config.polling_interval()?),
        ),
        price_source.clone(),
        price_source,
        store.clone(),
    )?;
    let handle = coordinator.handle();
    coordinator.spawn();

    println!(
        "{} {}",
        "Watching".bright_yellow(),
        handle.network().to_string().cyan()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.shutdown();
                break;
            }
            change = changes.recv() => match change {
                Ok(change) => display_change(&change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Watcher lagged, skipped {} changes", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    info!("State watcher stopped");
    Ok(())
}

/// Display a committed change in a nicely formatted way
fn display_change(change: &StateChange) {
    let now = Utc::now().format("[%H:%M:%S]").to_string();

    match change {
        StateChange::Height { network, height } => {
            println!(
                "{} {} {} {}",
                now.bright_black(),
                "⚡ BLOCK".bold().bright_green(),
                height.to_string().cyan().bold(),
                format!("on {}", network).bright_black()
            );
        }
        StateChange::Price(quote) => display_quote(&now, quote),
    }
}

fn display_quote(now: &str, quote: &PriceQuote) {
    let change = match quote.change_pct {
        Some(pct) if pct.is_sign_negative() => format!("{:.2}%", pct).red(),
        Some(pct) => format!("+{:.2}%", pct).green(),
        None => "n/a".bright_black(),
    };

    println!(
        "{} {} {}: {} (24h {})",
        now.bright_black(),
        "$ PRICE".bold().bright_yellow(),
        quote.asset.to_string().yellow(),
        quote.current.round_dp(4).to_string().cyan(),
        change
    );
}
