use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::email::{PassTrigger, QueueProcessor};

/// Background task that runs a processing pass on a fixed interval
pub struct ProcessorTask {
    processor: Arc<QueueProcessor>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl ProcessorTask {
    pub fn new(processor: Arc<QueueProcessor>, interval: Duration, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            processor,
            interval,
            shutdown,
        }
    }

    /// Run passes until shutdown.
    ///
    /// A pass in progress when shutdown arrives is finished first, so no
    /// claimed message is abandoned in `sending`.
    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.processor.config().batch_size,
            "Queue processor task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Queue processor task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    if let Err(e) = self.processor.run_pass(PassTrigger::Scheduled).await {
                        tracing::error!(error = %e, "Scheduled queue pass failed");
                    }
                }
            }
        }

        tracing::info!("Queue processor task stopped");
    }
}
