//! Scripted sources for tests and offline runs.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{BlockSource, PriceSource};
use crate::models::{AssetTag, NetworkId, PriceSample};
use crate::sync::ProviderError;

const SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Default)]
struct BlockState {
    heights: HashMap<NetworkId, u64>,
    failing: HashSet<NetworkId>,
    subscribers: HashMap<NetworkId, Vec<mpsc::Sender<u64>>>,
    subscribe_calls: HashMap<NetworkId, usize>,
    height_calls: HashMap<NetworkId, usize>,
    height_delay: Option<Duration>,
}

/// Block source whose heights are pushed by hand with [`MockBlockSource::emit`]
#[derive(Default)]
pub struct MockBlockSource {
    state: Mutex<BlockState>,
}

impl MockBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BlockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Height answered by `current_height`
    pub fn set_height(&self, network: NetworkId, height: u64) {
        self.state().heights.insert(network, height);
    }

    /// Make every call for `network` fail with a connection error
    pub fn set_failing(&self, network: NetworkId, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing.insert(network);
        } else {
            state.failing.remove(&network);
        }
    }

    /// Delay `current_height` answers
    pub fn set_height_delay(&self, delay: Duration) {
        self.state().height_delay = Some(delay);
    }

    /// Push a height to every open subscription on `network`. Returns how
    /// many subscribers received it.
    pub fn emit(&self, network: NetworkId, height: u64) -> usize {
        let mut state = self.state();
        let Some(subscribers) = state.subscribers.get_mut(&network) else {
            return 0;
        };
        subscribers.retain(|tx| !tx.is_closed());
        subscribers
            .iter()
            .filter(|tx| tx.try_send(height).is_ok())
            .count()
    }

    /// Simulate the upstream dropping every subscription on `network`
    pub fn close_subscriptions(&self, network: NetworkId) {
        self.state().subscribers.remove(&network);
    }

    pub fn subscribe_calls(&self, network: NetworkId) -> usize {
        self.state().subscribe_calls.get(&network).copied().unwrap_or(0)
    }

    pub fn height_calls(&self, network: NetworkId) -> usize {
        self.state().height_calls.get(&network).copied().unwrap_or(0)
    }

    /// Subscriptions whose receiver is still alive
    pub fn active_subscriptions(&self, network: NetworkId) -> usize {
        self.state()
            .subscribers
            .get(&network)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl BlockSource for MockBlockSource {
    async fn current_height(&self, network: NetworkId) -> Result<u64, ProviderError> {
        let delay = {
            let mut state = self.state();
            *state.height_calls.entry(network).or_default() += 1;
            state.height_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        if state.failing.contains(&network) {
            return Err(ProviderError::Connection(format!("{} unreachable", network)));
        }
        state
            .heights
            .get(&network)
            .copied()
            .ok_or_else(|| ProviderError::Unavailable(format!("no height for {}", network)))
    }

    async fn subscribe(&self, network: NetworkId) -> Result<mpsc::Receiver<u64>, ProviderError> {
        let mut state = self.state();
        *state.subscribe_calls.entry(network).or_default() += 1;
        if state.failing.contains(&network) {
            return Err(ProviderError::Subscription(format!("{} unreachable", network)));
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        state.subscribers.entry(network).or_default().push(tx);
        Ok(rx)
    }
}

#[derive(Default)]
struct PriceState {
    responses: HashMap<AssetTag, Result<PriceSample, ProviderError>>,
    delays: HashMap<AssetTag, Duration>,
    calls: Vec<(AssetTag, NetworkId)>,
}

/// Price source answering scripted samples
#[derive(Default)]
pub struct MockPriceSource {
    state: Mutex<PriceState>,
}

impl MockPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PriceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_price(&self, asset: AssetTag, current: Decimal, one_day_ago: Option<Decimal>) {
        self.state().responses.insert(
            asset,
            Ok(PriceSample {
                current,
                one_day_ago,
            }),
        );
    }

    pub fn set_error(&self, asset: AssetTag, error: ProviderError) {
        self.state().responses.insert(asset, Err(error));
    }

    pub fn set_delay(&self, asset: AssetTag, delay: Duration) {
        self.state().delays.insert(asset, delay);
    }

    pub fn calls(&self, asset: AssetTag) -> usize {
        self.state().calls.iter().filter(|(a, _)| *a == asset).count()
    }

    pub fn calls_for(&self, asset: AssetTag, network: NetworkId) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| **call == (asset, network))
            .count()
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn fetch_price(
        &self,
        asset: AssetTag,
        network: NetworkId,
    ) -> Result<PriceSample, ProviderError> {
        let delay = {
            let mut state = self.state();
            state.calls.push((asset, network));
            state.delays.get(&asset).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.state()
            .responses
            .get(&asset)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::Unavailable(format!("no {} price", asset))))
    }
}
