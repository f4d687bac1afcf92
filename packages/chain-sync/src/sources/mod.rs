//! Upstream collaborators: where block heights and prices come from.

mod mock;
mod rpc;
mod subgraph;

pub use mock::{MockBlockSource, MockPriceSource};
pub use rpc::EthersBlockSource;
pub use subgraph::{SubgraphEndpoints, SubgraphPriceSource};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{AssetTag, NetworkId, PriceSample};
use crate::sync::ProviderError;

/// Per-network block height provider
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Latest height, used as the initial value of a subscription
    async fn current_height(&self, network: NetworkId) -> Result<u64, ProviderError>;

    /// Stream of new heights for `network`. Dropping the receiver
    /// unsubscribes.
    async fn subscribe(&self, network: NetworkId) -> Result<mpsc::Receiver<u64>, ProviderError>;
}

/// Reference price provider
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(
        &self,
        asset: AssetTag,
        network: NetworkId,
    ) -> Result<PriceSample, ProviderError>;
}
