use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::email::EmailQueueStore;
use crate::metrics::ResilienceMetrics;
use crate::resilience::Connectivity;

/// Probes the store and publishes connectivity changes.
///
/// The receiving side of the watch channel feeds the offline queue.
pub struct ConnectivityMonitor {
    store: Arc<dyn EmailQueueStore>,
    interval: Duration,
    sender: watch::Sender<Connectivity>,
    shutdown: broadcast::Receiver<()>,
}

impl ConnectivityMonitor {
    pub fn new(
        store: Arc<dyn EmailQueueStore>,
        interval: Duration,
        sender: watch::Sender<Connectivity>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            store,
            interval,
            sender,
            shutdown,
        }
    }

    /// Probe once and publish the result. Returns the observed state.
    pub async fn probe(&self) -> Connectivity {
        let observed = match tokio::time::timeout(self.interval, self.store.ping()).await {
            Ok(Ok(())) => Connectivity::Online,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Store probe failed");
                Connectivity::Offline
            }
            Err(_) => {
                tracing::debug!(timeout_ms = self.interval.as_millis() as u64, "Store probe timed out");
                Connectivity::Offline
            }
        };

        let changed = self.sender.send_if_modified(|current| {
            if *current == observed {
                false
            } else {
                *current = observed;
                true
            }
        });
        if changed {
            ResilienceMetrics::set_online(observed == Connectivity::Online);
            match observed {
                Connectivity::Online => tracing::info!(backend = self.store.backend_type(), "Store connectivity restored"),
                Connectivity::Offline => tracing::warn!(backend = self.store.backend_type(), "Store connectivity lost"),
            }
        }
        observed
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            backend = self.store.backend_type(),
            "Connectivity monitor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Connectivity monitor received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.probe().await;
                }
            }
        }

        tracing::info!("Connectivity monitor stopped");
    }
}
