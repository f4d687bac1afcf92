use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// "Is the consumer currently observable?"
///
/// Fails open: without a source, or once the source is gone, the gate
/// reports visible so synchronization is never silently starved.
#[derive(Clone, Debug)]
pub struct VisibilityGate {
    source: Option<watch::Receiver<bool>>,
}

impl VisibilityGate {
    /// Gate with no visibility signal
    pub fn always_visible() -> Self {
        Self { source: None }
    }

    /// Gate following an event-based visibility source
    pub fn from_watch(source: watch::Receiver<bool>) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// Gate driven by polling `probe` every `interval`. `None` from the probe
    /// means the signal is unavailable and counts as visible.
    pub fn polled<F>(probe: F, interval: Duration, cancel: CancellationToken) -> Self
    where
        F: Fn() -> Option<bool> + Send + 'static,
    {
        let (tx, rx) = watch::channel(probe().unwrap_or(true));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let visible = probe().unwrap_or(true);
                        // Only wake listeners on transitions
                        tx.send_if_modified(|current| {
                            if *current != visible {
                                *current = visible;
                                true
                            } else {
                                false
                            }
                        });
                        if tx.is_closed() {
                            break;
                        }
                    }
                }
            }
            debug!("Visibility poller stopped");
        });

        Self::from_watch(rx)
    }

    pub fn is_visible(&self) -> bool {
        match &self.source {
            // A closed source counts as visible
            Some(rx) => rx.has_changed().is_err() || *rx.borrow(),
            None => true,
        }
    }

    /// Wait for the next visibility transition and return the new value.
    ///
    /// When the source closes this reports `true` once and drops the source.
    /// Never resolves when there is no live source to follow.
    pub async fn changed(&mut self) -> bool {
        let Some(rx) = self.source.as_mut() else {
            return std::future::pending().await;
        };

        match rx.changed().await {
            Ok(()) => *rx.borrow_and_update(),
            Err(_) => {
                debug!("Visibility source closed, treating consumer as visible");
                self.source = None;
                true
            }
        }
    }
}

impl Default for VisibilityGate {
    fn default() -> Self {
        Self::always_visible()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;

    #[test]
    fn missing_source_is_visible() {
        assert!(VisibilityGate::always_visible().is_visible());
    }

    #[tokio::test]
    async fn follows_watch_source() {
        let (tx, rx) = watch::channel(true);
        let mut gate = VisibilityGate::from_watch(rx);
        assert!(gate.is_visible());

        tx.send(false).unwrap();
        assert!(!gate.changed().await);
        assert!(!gate.is_visible());
    }

    #[tokio::test]
    async fn closed_source_fails_open() {
        let (tx, rx) = watch::channel(false);
        let mut gate = VisibilityGate::from_watch(rx);
        assert!(!gate.is_visible());

        drop(tx);
        assert!(gate.is_visible());
        assert!(gate.changed().await);
        assert!(gate.is_visible());

        // Reported once, then nothing left to follow
        let next = tokio::time::timeout(Duration::from_millis(10), gate.changed()).await;
        assert!(next.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn polled_probe_unknown_counts_as_visible() {
        // 0 = hidden, 1 = visible, 2 = unknown
        let state = Arc::new(AtomicU8::new(0));
        let probe_state = state.clone();
        let cancel = CancellationToken::new();
        let mut gate = VisibilityGate::polled(
            move || match probe_state.load(Ordering::SeqCst) {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
            Duration::from_secs(1),
            cancel.clone(),
        );
        assert!(!gate.is_visible());

        state.store(2, Ordering::SeqCst);
        assert!(gate.changed().await);

        cancel.cancel();
    }
}
