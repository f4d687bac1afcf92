//! Where synchronized chain state is committed.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::models::{AssetTag, NetworkId, PriceQuote};

const CHANGE_FEED_CAPACITY: usize = 256;

/// Write side of the shared application state.
///
/// Commits are per-key last-write-wins: heights keyed by network, quotes by
/// asset. Implementations must not merge with the previous value.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn commit_height(&self, network: NetworkId, height: u64);

    async fn commit_price(&self, quote: PriceQuote);
}

/// A committed update, as seen by watchers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateChange {
    Height { network: NetworkId, height: u64 },
    Price(PriceQuote),
}

/// Point-in-time copy of the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSnapshot {
    pub heights: HashMap<NetworkId, u64>,
    pub native_price: Option<PriceQuote>,
    pub secondary_price: Option<PriceQuote>,
}

/// In-memory state store with a change feed
pub struct SyncStore {
    heights: RwLock<HashMap<NetworkId, u64>>,
    prices: RwLock<HashMap<AssetTag, PriceQuote>>,
    changes: broadcast::Sender<StateChange>,
}

impl SyncStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            heights: RwLock::new(HashMap::new()),
            prices: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Last committed height for `network`
    pub async fn height(&self, network: NetworkId) -> Option<u64> {
        self.heights.read().await.get(&network).copied()
    }

    /// Last committed quote for `asset`, `None` means "no data yet"
    pub async fn price(&self, asset: AssetTag) -> Option<PriceQuote> {
        self.prices.read().await.get(&asset).copied()
    }

    pub async fn snapshot(&self) -> SyncSnapshot {
        let heights = self.heights.read().await.clone();
        let prices = self.prices.read().await;
        SyncSnapshot {
            heights,
            native_price: prices.get(&AssetTag::Native).copied(),
            secondary_price: prices.get(&AssetTag::Secondary).copied(),
        }
    }

    /// Feed of every commit made after this call
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    fn publish(&self, change: StateChange) {
        // No watchers is fine
        let _ = self.changes.send(change);
    }
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateSink for SyncStore {
    async fn commit_height(&self, network: NetworkId, height: u64) {
        self.heights.write().await.insert(network, height);
        debug!("Committed height {} for {}", height, network);
        self.publish(StateChange::Height { network, height });
    }

    async fn commit_price(&self, quote: PriceQuote) {
        self.prices.write().await.insert(quote.asset, quote);
        debug!("Committed {} price {}", quote.asset, quote.current);
        self.publish(StateChange::Price(quote));
    }
}
