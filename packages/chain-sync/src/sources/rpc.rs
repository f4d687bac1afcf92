use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, Ws};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::BlockSource;
use crate::config::{NetworkEndpoints, DEFAULT_POLLING_INTERVAL_MS};
use crate::models::NetworkId;
use crate::sync::ProviderError;
use crate::utils::retry::{with_retry, RetryPolicy};

/// Buffered heights per subscription before the forwarder waits
const SUBSCRIPTION_BUFFER: usize = 64;

/// Block heights from JSON-RPC nodes.
///
/// Subscribes over WebSocket when the network has a `ws_url`, otherwise polls
/// the HTTP endpoint.
pub struct EthersBlockSource {
    endpoints: HashMap<NetworkId, NetworkEndpoints>,
    retry: RetryPolicy,
    polling_interval: Duration,
}

impl EthersBlockSource {
    pub fn new(endpoints: HashMap<NetworkId, NetworkEndpoints>) -> Self {
        Self {
            endpoints,
            retry: RetryPolicy::default(),
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
        }
    }

    /// Configure retry settings
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Polling interval used when no WebSocket endpoint is configured
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    fn endpoints(&self, network: NetworkId) -> Result<&NetworkEndpoints, ProviderError> {
        self.endpoints
            .get(&network)
            .ok_or(ProviderError::UnknownNetwork(network))
    }

    fn http_provider(&self, network: NetworkId) -> Result<Provider<Http>, ProviderError> {
        let url = self
            .endpoints(network)?
            .http_url
            .as_deref()
            .ok_or(ProviderError::UnknownNetwork(network))?;

        Provider::<Http>::try_from(url).map_err(|e| {
            ProviderError::Connection(format!("Failed to create HTTP provider: {}", e))
        })
    }

    /// Forward `newHeads` from a WebSocket subscription
    async fn subscribe_ws(
        &self,
        network: NetworkId,
        ws_url: String,
    ) -> Result<mpsc::Receiver<u64>, ProviderError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();

        // The subscription stream borrows its provider, so both live in the task
        tokio::spawn(async move {
            let provider = match Provider::<Ws>::connect(ws_url.as_str()).await {
                Ok(provider) => provider,
                Err(e) => {
                    let _ = ready_tx.send(Err(ProviderError::Connection(format!(
                        "WebSocket connect to {} failed: {}",
                        ws_url, e
                    ))));
                    return;
                }
            };

            let mut stream = match provider.subscribe_blocks().await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(ProviderError::Subscription(e.to_string())));
                    return;
                }
            };

            if ready_tx.send(Ok(())).is_err() {
                return;
            }
            info!("Subscribed to new blocks on {} via {}", network, ws_url);

            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        debug!("Block subscription for {} dropped by consumer", network);
                        break;
                    }
                    next = stream.next() => match next {
                        Some(block) => {
                            let Some(number) = block.number else { continue };
                            if tx.send(number.as_u64()).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            warn!("WebSocket block stream for {} ended", network);
                            break;
                        }
                    }
                }
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::Subscription(format!(
                "subscription task for {} exited before it was ready",
                network
            ))),
        }
    }

    /// Poll `eth_blockNumber` and forward changes
    fn subscribe_polling(
        &self,
        network: NetworkId,
        provider: Provider<Http>,
    ) -> mpsc::Receiver<u64> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let polling_interval = self.polling_interval;

        info!(
            "No WebSocket endpoint for {}, polling every {:?}",
            network, polling_interval
        );

        tokio::spawn(async move {
            let mut last_block: Option<u64> = None;
            loop {
                match provider.get_block_number().await {
                    Ok(latest) => {
                        let latest = latest.as_u64();
                        if last_block != Some(latest) {
                            debug!("Found new block {} on {}", latest, network);
                            last_block = Some(latest);
                            if tx.send(latest).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error fetching latest block number for {}: {}", network, e);
                    }
                }

                tokio::select! {
                    _ = tx.closed() => break,
                    _ = sleep(polling_interval) => {}
                }
            }
            debug!("Block polling for {} stopped", network);
        });

        rx
    }
}

#[async_trait]
impl BlockSource for EthersBlockSource {
    async fn current_height(&self, network: NetworkId) -> Result<u64, ProviderError> {
        let provider = self.http_provider(network)?;

        let number = with_retry(
            || async {
                provider
                    .get_block_number()
                    .await
                    .map_err(ProviderError::from)
            },
            self.retry,
            &format!("get_block_number_{}", network.chain_id()),
        )
        .await?;

        Ok(number.as_u64())
    }

    async fn subscribe(&self, network: NetworkId) -> Result<mpsc::Receiver<u64>, ProviderError> {
        match self.endpoints(network)?.ws_url.clone() {
            Some(ws_url) => self.subscribe_ws(network, ws_url).await,
            None => {
                let provider = self.http_provider(network)?;
                Ok(self.subscribe_polling(network, provider))
            }
        }
    }
}
