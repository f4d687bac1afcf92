use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::models::BlockObservation;

#[derive(Debug, Clone, Copy)]
struct Pending {
    observation: BlockObservation,
    deadline: Instant,
}

/// Coalesces block observations into at most one emission per window.
///
/// The deadline is fixed when the first observation of a burst arrives and is
/// not pushed back by later ones, so latency is bounded by `window` even under
/// a continuous stream of events.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: Option<Pending>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn submit(&mut self, observation: BlockObservation) {
        self.submit_at(observation, Instant::now());
    }

    fn submit_at(&mut self, observation: BlockObservation, now: Instant) {
        match self.pending.as_mut() {
            Some(pending) if pending.observation.network == observation.network => {
                // Last write wins, deadline unchanged
                pending.observation = observation;
            }
            Some(pending) => {
                debug!(
                    "Dropping pending height {} for {}: superseded by {}",
                    pending.observation.height, pending.observation.network, observation.network
                );
                self.pending = Some(Pending {
                    observation,
                    deadline: now + self.window,
                });
            }
            None => {
                self.pending = Some(Pending {
                    observation,
                    deadline: now + self.window,
                });
            }
        }
    }

    pub fn pending(&self) -> Option<BlockObservation> {
        self.pending.map(|p| p.observation)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.deadline)
    }

    /// Take the pending observation if its deadline has passed
    pub fn take_due(&mut self, now: Instant) -> Option<BlockObservation> {
        match self.pending {
            Some(pending) if pending.deadline <= now => {
                self.pending = None;
                Some(pending.observation)
            }
            _ => None,
        }
    }

    /// Clear any pending observation without emitting it. Returns whether
    /// something was dropped.
    pub fn invalidate(&mut self) -> bool {
        self.pending.take().is_some()
    }
}

/// Sleep until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NetworkId;

    const WINDOW: Duration = Duration::from_millis(100);

    fn obs(network: NetworkId, height: u64) -> BlockObservation {
        BlockObservation::new(network, height)
    }

    #[test]
    fn burst_collapses_to_last_value() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);

        debouncer.submit_at(obs(NetworkId::POLYGON, 100), start);
        debouncer.submit_at(obs(NetworkId::POLYGON, 102), start + Duration::from_millis(10));
        debouncer.submit_at(obs(NetworkId::POLYGON, 101), start + Duration::from_millis(20));

        assert_eq!(debouncer.take_due(start + Duration::from_millis(50)), None);
        assert_eq!(
            debouncer.take_due(start + WINDOW),
            Some(obs(NetworkId::POLYGON, 101))
        );
        assert_eq!(debouncer.take_due(start + WINDOW * 2), None);
    }

    #[test]
    fn deadline_is_a_ceiling_not_reset_by_activity() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);

        debouncer.submit_at(obs(NetworkId::POLYGON, 1), start);
        debouncer.submit_at(obs(NetworkId::POLYGON, 2), start + Duration::from_millis(90));

        assert_eq!(debouncer.deadline(), Some(start + WINDOW));
    }

    #[test]
    fn other_network_replaces_pending_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);

        debouncer.submit_at(obs(NetworkId::POLYGON, 500), start);
        let later = start + Duration::from_millis(60);
        debouncer.submit_at(obs(NetworkId::POLYGON_MUMBAI, 7), later);

        assert_eq!(debouncer.pending(), Some(obs(NetworkId::POLYGON_MUMBAI, 7)));
        assert_eq!(debouncer.deadline(), Some(later + WINDOW));
    }

    #[test]
    fn invalidate_drops_without_emitting() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);

        debouncer.submit_at(obs(NetworkId::POLYGON, 9), start);
        assert!(debouncer.invalidate());
        assert!(!debouncer.invalidate());
        assert_eq!(debouncer.take_due(start + WINDOW), None);
        assert_eq!(debouncer.deadline(), None);
    }
}
