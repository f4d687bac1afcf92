use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::debounce::sleep_until_deadline;
use super::{
    BlockTracker, ConfigError, CoordinatorStopped, Debouncer, DiscardReason, PriceRefresher,
    PriceUpdate, VisibilityGate,
};
use crate::config::SyncConfig;
use crate::models::{BlockObservation, NetworkId};
use crate::sources::{BlockSource, PriceSource};
use crate::store::StateSink;
use crate::utils::time::format_duration;

const EVENT_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 32;

#[derive(Debug)]
enum Command {
    SetNetwork(NetworkId),
}

/// Control handle for a running [`SyncCoordinator`]
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    network: watch::Receiver<NetworkId>,
    cancel: CancellationToken,
}

impl SyncHandle {
    /// Make `network` the active network. Same network again is a no-op.
    pub async fn set_network(&self, network: NetworkId) -> Result<(), CoordinatorStopped> {
        self.commands
            .send(Command::SetNetwork(network))
            .await
            .map_err(|_| CoordinatorStopped)
    }

    /// Network of the current epoch
    pub fn network(&self) -> NetworkId {
        *self.network.borrow()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Owns the active network and wires tracking, debouncing and price refresh
/// around it.
///
/// All mutable state lives in this single task. Every commit re-checks that
/// the value belongs to the current network and that the consumer is visible.
pub struct SyncCoordinator {
    config: SyncConfig,
    network: NetworkId,
    visible: bool,
    gate: VisibilityGate,
    network_source: Option<watch::Receiver<NetworkId>>,
    tracker: BlockTracker,
    debouncer: Debouncer,
    refresher: PriceRefresher,
    sink: Arc<dyn StateSink>,
    heights: mpsc::Receiver<BlockObservation>,
    prices: mpsc::Receiver<PriceUpdate>,
    commands: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    network_tx: watch::Sender<NetworkId>,
    cancel: CancellationToken,
}

impl SyncCoordinator {
    pub fn new(
        config: SyncConfig,
        network: NetworkId,
        block_source: Arc<dyn BlockSource>,
        native_prices: Arc<dyn PriceSource>,
        secondary_prices: Arc<dyn PriceSource>,
        sink: Arc<dyn StateSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let (height_tx, heights) = mpsc::channel(EVENT_BUFFER);
        let (price_tx, prices) = mpsc::channel(EVENT_BUFFER);
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (network_tx, _) = watch::channel(network);

        let tracker = BlockTracker::new(block_source, height_tx, cancel.child_token());
        let refresher = PriceRefresher::new(
            native_prices,
            secondary_prices,
            price_tx,
            cancel.child_token(),
        );

        Ok(Self {
            debouncer: Debouncer::new(config.debounce_window),
            config,
            network,
            visible: true,
            gate: VisibilityGate::always_visible(),
            network_source: None,
            tracker,
            refresher,
            sink,
            heights,
            prices,
            commands,
            command_tx,
            network_tx,
            cancel,
        })
    }

    /// Follow a visibility signal instead of assuming always visible
    pub fn with_visibility(mut self, gate: VisibilityGate) -> Self {
        self.gate = gate;
        self
    }

    /// Follow an external network identity source
    pub fn with_network_source(mut self, source: watch::Receiver<NetworkId>) -> Self {
        self.network_source = Some(source);
        self
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            commands: self.command_tx.clone(),
            network: self.network_tx.subscribe(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the handle shuts the coordinator down
    pub async fn run(mut self) {
        info!(
            "Starting chain sync on {} (debounce {}, price refresh every {})",
            self.network,
            format_duration(self.config.debounce_window),
            format_duration(self.config.price_refresh_interval)
        );

        if let Some(source) = self.network_source.as_mut() {
            let external = *source.borrow_and_update();
            self.network = external;
            self.network_tx.send_replace(external);
        }

        self.visible = self.gate.is_visible();
        if !self.visible {
            info!("Consumer hidden at startup, sync suspended");
            self.tracker.suspend();
        }
        self.tracker.on_network_changed(self.network);
        if self.visible {
            self.refresher.refresh_all(self.network);
        }

        // One timebase for both assets, first tick one period from now
        let start = Instant::now();
        let mut price_timer = interval_at(
            start + self.config.price_refresh_interval,
            self.config.price_refresh_interval,
        );
        price_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut recheck = interval_at(
            start + self.config.resubscribe_interval,
            self.config.resubscribe_interval,
        );
        recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.debouncer.deadline();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,
                Some(command) = self.commands.recv() => match command {
                    Command::SetNetwork(network) => self.set_network(network),
                },
                Some(network) = next_network(&mut self.network_source) => self.set_network(network),
                visible = self.gate.changed() => self.on_visibility(visible),
                // Ahead of heights so an event storm cannot starve the deadline
                _ = sleep_until_deadline(deadline) => self.flush_debounced().await,
                Some(update) = self.prices.recv() => self.on_price(update).await,
                Some(observation) = self.heights.recv() => self.on_height(observation),
                _ = price_timer.tick() => self.on_price_tick(),
                _ = recheck.tick() => {
                    self.tracker.ensure_subscribed();
                }
            }
        }

        self.tracker.suspend();
        info!("Chain sync stopped");
    }

    fn set_network(&mut self, network: NetworkId) {
        if network == self.network {
            debug!("Already on {}, ignoring network change", network);
            return;
        }

        info!("Network changed: {} -> {}", self.network, network);
        if self.debouncer.invalidate() {
            debug!("Dropped pending height for {}", self.network);
        }
        self.network = network;
        self.network_tx.send_replace(network);

        self.tracker.on_network_changed(network);
        if self.visible {
            self.refresher.refresh_all(network);
        }
    }

    fn on_visibility(&mut self, visible: bool) {
        if visible == self.visible {
            return;
        }
        self.visible = visible;

        if visible {
            info!("Consumer visible, resuming sync on {}", self.network);
            self.tracker.resume();
            self.refresher.refresh_all(self.network);
        } else {
            info!("Consumer hidden, suspending sync");
            self.tracker.suspend();
            self.debouncer.invalidate();
        }
    }

    fn on_height(&mut self, observation: BlockObservation) {
        match self.tracker.on_height_event(observation) {
            Ok(observation) => self.debouncer.submit(observation),
            Err(reason) => debug!(
                "Discarded height {} for {}: {}",
                observation.height, observation.network, reason
            ),
        }
    }

    async fn flush_debounced(&mut self) {
        let Some(observation) = self.debouncer.take_due(Instant::now()) else {
            return;
        };

        match self.admit(observation.network) {
            Ok(()) => {
                self.sink
                    .commit_height(observation.network, observation.height)
                    .await
            }
            Err(reason) => debug!(
                "Discarded debounced height {} for {}: {}",
                observation.height, observation.network, reason
            ),
        }
    }

    async fn on_price(&mut self, update: PriceUpdate) {
        match self.admit(update.network) {
            Ok(()) => self.sink.commit_price(update.quote).await,
            Err(reason) => debug!(
                "Discarded {} price fetched for {}: {}",
                update.quote.asset, update.network, reason
            ),
        }
    }

    fn on_price_tick(&mut self) {
        if !self.gate.is_visible() {
            debug!("Consumer hidden, skipping scheduled price refresh");
            return;
        }
        self.refresher.refresh_all(self.network);
    }

    /// Commit boundary check
    fn admit(&self, network: NetworkId) -> Result<(), DiscardReason> {
        if network != self.network {
            return Err(DiscardReason::StaleNetwork);
        }
        if !self.gate.is_visible() {
            return Err(DiscardReason::Hidden);
        }
        Ok(())
    }
}

/// Next value of the external network source, pending forever without one
async fn next_network(source: &mut Option<watch::Receiver<NetworkId>>) -> Option<NetworkId> {
    match source {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}
