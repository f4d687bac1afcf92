use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::{AssetTag, NetworkId, PriceQuote};
use crate::sources::PriceSource;

/// A fetched quote and the network it was requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceUpdate {
    pub network: NetworkId,
    pub quote: PriceQuote,
}

/// Fetches native and secondary prices.
///
/// Each asset is fetched in its own task: one failing or hanging never
/// delays the other. Successful quotes go to the coordinator, failures are
/// logged and leave the previous quote in place.
pub struct PriceRefresher {
    native: Arc<dyn PriceSource>,
    secondary: Arc<dyn PriceSource>,
    results: mpsc::Sender<PriceUpdate>,
    cancel: CancellationToken,
}

impl PriceRefresher {
    pub fn new(
        native: Arc<dyn PriceSource>,
        secondary: Arc<dyn PriceSource>,
        results: mpsc::Sender<PriceUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            native,
            secondary,
            results,
            cancel,
        }
    }

    fn source(&self, asset: AssetTag) -> Arc<dyn PriceSource> {
        match asset {
            AssetTag::Native => self.native.clone(),
            AssetTag::Secondary => self.secondary.clone(),
        }
    }

    /// Start a fetch for every asset. Fetches still in flight from an earlier
    /// refresh are left running; the last one to complete wins.
    pub fn refresh_all(&self, network: NetworkId) {
        debug!("Refreshing prices for {}", network);
        for asset in AssetTag::ALL {
            self.spawn_fetch(asset, network);
        }
    }

    fn spawn_fetch(&self, asset: AssetTag, network: NetworkId) {
        let source = self.source(asset);
        let results = self.results.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = source.fetch_price(asset, network) => result,
            };

            match result {
                Ok(sample) => {
                    let quote = PriceQuote::new(asset, sample);
                    debug!("Fetched {} price {} on {}", asset, quote.current, network);
                    // Coordinator gone means shutdown
                    let _ = results.send(PriceUpdate { network, quote }).await;
                }
                Err(e) => warn!("Failed to refresh {} price for {}: {}", asset, network, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockPriceSource;
    use crate::sync::ProviderError;
    use rust_decimal::Decimal;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn one_failing_asset_does_not_block_the_other() {
        let source = Arc::new(MockPriceSource::new());
        source.set_price(AssetTag::Native, Decimal::from(3000), Some(Decimal::from(3100)));
        source.set_error(
            AssetTag::Secondary,
            ProviderError::Connection("subgraph down".to_string()),
        );

        let (tx, mut rx) = mpsc::channel(8);
        let refresher =
            PriceRefresher::new(source.clone(), source.clone(), tx, CancellationToken::new());
        refresher.refresh_all(NetworkId::POLYGON);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.network, NetworkId::POLYGON);
        assert_eq!(update.quote.asset, AssetTag::Native);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(source.calls(AssetTag::Secondary), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_asset_does_not_delay_fast_one() {
        let source = Arc::new(MockPriceSource::new());
        source.set_price(AssetTag::Native, Decimal::from(1), None);
        source.set_price(AssetTag::Secondary, Decimal::from(2), None);
        source.set_delay(AssetTag::Native, Duration::from_secs(30));

        let (tx, mut rx) = mpsc::channel(8);
        let refresher = PriceRefresher::new(source.clone(), source, tx, CancellationToken::new());
        refresher.refresh_all(NetworkId::POLYGON);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.quote.asset, AssetTag::Secondary);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.quote.asset, AssetTag::Native);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_fetches_report_nothing() {
        let source = Arc::new(MockPriceSource::new());
        source.set_price(AssetTag::Native, Decimal::from(1), None);
        source.set_delay(AssetTag::Native, Duration::from_secs(5));

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let refresher = PriceRefresher::new(source.clone(), source, tx, cancel.clone());
        refresher.refresh_all(NetworkId::POLYGON);
        cancel.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
