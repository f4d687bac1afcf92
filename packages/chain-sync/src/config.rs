use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::models::NetworkId;
use crate::sync::ConfigError;
use crate::utils::retry::RetryPolicy;

pub const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 100;
pub const DEFAULT_PRICE_REFRESH_INTERVAL_MS: u64 = 600_000;
pub const DEFAULT_VISIBILITY_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_RESUBSCRIBE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 2_000;

/// Upstream endpoints for one network
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NetworkEndpoints {
    pub http_url: Option<String>,
    pub ws_url: Option<String>,
    /// Subgraph answering the native price
    pub price_subgraph_url: Option<String>,
    /// Subgraph answering the secondary price, falls back to `price_subgraph_url`
    pub secondary_price_subgraph_url: Option<String>,
    /// Block-by-timestamp subgraph used for 24h-ago lookups
    pub blocks_subgraph_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Chain id the updater starts on
    pub network: u64,
    pub debounce_window_ms: u64,
    pub price_refresh_interval_ms: u64,
    pub visibility_poll_interval_ms: u64,
    pub resubscribe_interval_ms: u64,
    /// Block polling period for networks without a WebSocket endpoint
    pub polling_interval_ms: u64,
    pub retry_delay: u64,
    pub max_retries: u32,
    /// Subgraph bundle field holding the native price
    pub native_price_field: String,
    /// Subgraph bundle field holding the secondary price
    pub secondary_price_field: String,
    /// While this file exists the updater behaves as if the consumer were hidden
    #[serde(default)]
    pub pause_file: Option<String>,
    /// Keyed by chain id
    #[serde(default)]
    pub networks: HashMap<String, NetworkEndpoints>,
}

impl Config {
    /// Load from `.env`, an optional `chain-sync.toml` and the environment
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        let _ = dotenv::dotenv();

        let builder = Self::defaults()?
            .add_source(File::with_name("chain-sync").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        let config = Self::build(builder).context("Failed to load configuration")?;
        Ok(config)
    }

    /// Builder preloaded with every default value
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let builder = config::Config::builder()
            .set_default("network", NetworkId::default().chain_id())?
            .set_default("debounce_window_ms", DEFAULT_DEBOUNCE_WINDOW_MS)?
            .set_default("price_refresh_interval_ms", DEFAULT_PRICE_REFRESH_INTERVAL_MS)?
            .set_default("visibility_poll_interval_ms", DEFAULT_VISIBILITY_POLL_INTERVAL_MS)?
            .set_default("resubscribe_interval_ms", DEFAULT_RESUBSCRIBE_INTERVAL_MS)?
            .set_default("polling_interval_ms", DEFAULT_POLLING_INTERVAL_MS)?
            .set_default("retry_delay", 1000)?
            .set_default("max_retries", 3)?
            .set_default("native_price_field", "ethPriceUSD")?
            .set_default("secondary_price_field", "maticPriceUSD")?;
        Ok(builder)
    }

    /// Deserialize and validate
    pub fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync_config()?;
        self.polling_interval()?;
        self.network_endpoints()?;
        Ok(())
    }

    pub fn network_id(&self) -> NetworkId {
        NetworkId(self.network)
    }

    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        SyncConfig::from_millis(
            self.debounce_window_ms,
            self.price_refresh_interval_ms,
            self.visibility_poll_interval_ms,
            self.resubscribe_interval_ms,
        )
    }

    pub fn polling_interval(&self) -> Result<Duration, ConfigError> {
        if self.polling_interval_ms == 0 {
            return Err(ConfigError::NonPositive("polling_interval_ms"));
        }
        Ok(Duration::from_millis(self.polling_interval_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_delay, self.max_retries)
    }

    pub fn network_endpoints(&self) -> Result<HashMap<NetworkId, NetworkEndpoints>, ConfigError> {
        self.networks
            .iter()
            .map(|(key, endpoints)| {
                let chain_id = key.parse::<u64>().map_err(|_| {
                    ConfigError::Invalid(format!("network key '{}' is not a chain id", key))
                })?;
                Ok((NetworkId(chain_id), endpoints.clone()))
            })
            .collect()
    }
}

/// Timing parameters of the updater, all strictly positive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub debounce_window: Duration,
    pub price_refresh_interval: Duration,
    pub visibility_poll_interval: Duration,
    pub resubscribe_interval: Duration,
}

impl SyncConfig {
    pub fn from_millis(
        debounce_window_ms: u64,
        price_refresh_interval_ms: u64,
        visibility_poll_interval_ms: u64,
        resubscribe_interval_ms: u64,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            debounce_window: Duration::from_millis(debounce_window_ms),
            price_refresh_interval: Duration::from_millis(price_refresh_interval_ms),
            visibility_poll_interval: Duration::from_millis(visibility_poll_interval_ms),
            resubscribe_interval: Duration::from_millis(resubscribe_interval_ms),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn with_price_refresh_interval(mut self, interval: Duration) -> Self {
        self.price_refresh_interval = interval;
        self
    }

    pub fn with_resubscribe_interval(mut self, interval: Duration) -> Self {
        self.resubscribe_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_window.is_zero() {
            return Err(ConfigError::NonPositive("debounce_window_ms"));
        }
        if self.price_refresh_interval.is_zero() {
            return Err(ConfigError::NonPositive("price_refresh_interval_ms"));
        }
        if self.visibility_poll_interval.is_zero() {
            return Err(ConfigError::NonPositive("visibility_poll_interval_ms"));
        }
        if self.resubscribe_interval.is_zero() {
            return Err(ConfigError::NonPositive("resubscribe_interval_ms"));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(DEFAULT_DEBOUNCE_WINDOW_MS),
            price_refresh_interval: Duration::from_millis(DEFAULT_PRICE_REFRESH_INTERVAL_MS),
            visibility_poll_interval: Duration::from_millis(DEFAULT_VISIBILITY_POLL_INTERVAL_MS),
            resubscribe_interval: Duration::from_millis(DEFAULT_RESUBSCRIBE_INTERVAL_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::build(Config::defaults().unwrap()).unwrap();
        assert_eq!(config.network_id(), NetworkId::POLYGON);
        assert_eq!(config.sync_config().unwrap(), SyncConfig::default());
        assert_eq!(config.retry_policy(), RetryPolicy::new(1000, 3));
        assert_eq!(config.polling_interval().unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn zero_window_is_rejected() {
        let builder = Config::defaults()
            .unwrap()
            .set_override("debounce_window_ms", 0)
            .unwrap();

        match Config::build(builder) {
            Err(ConfigError::NonPositive(field)) => assert_eq!(field, "debounce_window_ms"),
            other => panic!("expected NonPositive, got {:?}", other),
        }
    }

    #[test]
    fn zero_polling_interval_is_rejected() {
        let builder = Config::defaults()
            .unwrap()
            .set_override("polling_interval_ms", 0)
            .unwrap();
        assert!(matches!(
            Config::build(builder),
            Err(ConfigError::NonPositive("polling_interval_ms"))
        ));
    }

    #[test]
    fn zero_refresh_interval_is_rejected() {
        let err = SyncConfig::from_millis(100, 0, 1000, 1000).unwrap_err();
        assert!(matches!(err, ConfigError::NonPositive("price_refresh_interval_ms")));
    }

    #[test]
    fn network_keys_must_be_chain_ids() {
        let builder = Config::defaults()
            .unwrap()
            .set_override("networks.137.http_url", "http://localhost:8545")
            .unwrap();
        let config = Config::build(builder).unwrap();
        let endpoints = config.network_endpoints().unwrap();
        assert_eq!(
            endpoints[&NetworkId::POLYGON].http_url.as_deref(),
            Some("http://localhost:8545")
        );

        let builder = Config::defaults()
            .unwrap()
            .set_override("networks.polygon.http_url", "http://localhost:8545")
            .unwrap();
        assert!(matches!(Config::build(builder), Err(ConfigError::Invalid(_))));
    }
}
