use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{BlockObservation, NetworkId};
use crate::sources::BlockSource;
use crate::sync::DiscardReason;

/// A live upstream subscription for one network.
///
/// Dropping it cancels the forwarding task, which drops the upstream
/// receiver and so unsubscribes.
struct Subscription {
    network: NetworkId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Subscription {
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        debug!("Unsubscribed from blocks on {}", self.network);
    }
}

/// Tracks the latest block height of the active network only
pub struct BlockTracker {
    source: Arc<dyn BlockSource>,
    events: mpsc::Sender<BlockObservation>,
    cancel: CancellationToken,
    current: Option<NetworkId>,
    latest: Option<u64>,
    subscription: Option<Subscription>,
    /// False while the consumer is hidden
    active: bool,
}

impl BlockTracker {
    pub fn new(
        source: Arc<dyn BlockSource>,
        events: mpsc::Sender<BlockObservation>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            events,
            cancel,
            current: None,
            latest: None,
            subscription: None,
            active: true,
        }
    }

    /// Latest accepted height in the current network epoch
    pub fn latest_height(&self) -> Option<u64> {
        self.latest
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .as_ref()
            .map_or(false, |sub| !sub.is_finished())
    }

    /// Switch tracking to `network`. A repeated call with the current network
    /// is a no-op; returns whether anything changed.
    pub fn on_network_changed(&mut self, network: NetworkId) -> bool {
        if self.current == Some(network) {
            debug!("Block tracker already on {}", network);
            return false;
        }

        self.current = Some(network);
        self.latest = None;
        // Tear down the old subscription before opening the new one
        self.subscription = None;

        if self.active {
            self.subscribe();
        }
        true
    }

    /// Accept a height event if it belongs to the current network
    pub fn on_height_event(
        &mut self,
        observation: BlockObservation,
    ) -> Result<BlockObservation, DiscardReason> {
        if self.current != Some(observation.network) {
            return Err(DiscardReason::StaleNetwork);
        }

        // Lower heights pass through: the provider may have reorged
        self.latest = Some(observation.height);
        Ok(observation)
    }

    /// Stop all upstream work, keeping the current network
    pub fn suspend(&mut self) {
        self.active = false;
        self.subscription = None;
    }

    /// Resume after `suspend` with a fresh subscription
    pub fn resume(&mut self) {
        self.active = true;
        self.latest = None;
        self.subscription = None;
        self.subscribe();
    }

    /// Re-establish the subscription if it ended (upstream failure).
    /// Returns whether a new subscription was started.
    pub fn ensure_subscribed(&mut self) -> bool {
        if !self.active || self.current.is_none() || self.is_subscribed() {
            return false;
        }
        if let Some(network) = self.current {
            info!("Block subscription for {} is down, resubscribing", network);
        }
        self.subscribe();
        true
    }

    fn subscribe(&mut self) {
        let Some(network) = self.current else { return };

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(forward_heights(
            self.source.clone(),
            network,
            self.events.clone(),
            cancel.clone(),
        ));

        self.subscription = Some(Subscription {
            network,
            cancel,
            handle,
        });
    }
}

/// Initial height, then every subscription event, tagged with `network`
async fn forward_heights(
    source: Arc<dyn BlockSource>,
    network: NetworkId,
    events: mpsc::Sender<BlockObservation>,
    cancel: CancellationToken,
) {
    let run = async {
        match source.current_height(network).await {
            Ok(height) => {
                if events.send(BlockObservation::new(network, height)).await.is_err() {
                    return;
                }
            }
            Err(e) => error!("Failed to get block number for {}: {}", network, e),
        }

        let mut heights = match source.subscribe(network).await {
            Ok(heights) => heights,
            Err(e) => {
                error!("Failed to subscribe to blocks on {}: {}", network, e);
                return;
            }
        };
        debug!("Listening for blocks on {}", network);

        while let Some(height) = heights.recv().await {
            if events.send(BlockObservation::new(network, height)).await.is_err() {
                return;
            }
        }
        warn!("Block subscription for {} closed by upstream", network);
    };

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = run => {}
    }
}
