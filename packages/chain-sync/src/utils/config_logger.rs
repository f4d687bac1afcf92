use tracing::{info, warn};

use crate::config::Config;
use crate::utils::time::format_duration;

pub fn log_config(config: &Config) {
    info!(
        "Config: network={}, debounce_window_ms={}, price_refresh_interval_ms={}, max_retries={}",
        config.network_id(),
        config.debounce_window_ms,
        config.price_refresh_interval_ms,
        config.max_retries
    );

    if let Ok(sync) = config.sync_config() {
        info!(
            "Prices refresh every {}, block subscription rechecked every {}",
            format_duration(sync.price_refresh_interval),
            format_duration(sync.resubscribe_interval)
        );
    }

    // Log which networks have endpoints
    match config.network_endpoints() {
        Ok(endpoints) => {
            if !endpoints.contains_key(&config.network_id()) {
                warn!("No endpoints configured for starting network {}", config.network_id());
            }
            for (network, endpoints) in endpoints {
                info!(
                    "Network {}: http={}, ws={}, price subgraph={}",
                    network,
                    endpoints.http_url.is_some(),
                    endpoints.ws_url.is_some(),
                    endpoints.price_subgraph_url.is_some()
                );
            }
        }
        Err(e) => warn!("Invalid network endpoints: {}", e),
    }
}
