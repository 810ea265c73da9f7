//! Queue processor: one invocation is one bounded, sequential pass.
//!
//! Each due message is claimed, handed to the transport and its outcome
//! recorded before the next one starts. Per-message failures are recorded
//! on the message itself and never abort the pass.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;

use super::clock::Clock;
use super::ladder::retry_delay_for;
use super::models::{DeliveryOutcome, QueuedMessage, StoreError};
use super::store::EmailQueueStore;
use super::transport::{EmailTransport, OutboundEmail};
use crate::metrics::EmailMetrics;

/// Messages handled per pass
pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub batch_size: usize,
    /// Pause between messages to stay under provider rate limits
    pub inter_message_delay: Duration,
    /// Claims older than this are returned to `retry` at the start of a pass
    pub stale_claim_after: Option<chrono::Duration>,
    /// Sender used when a message has none
    pub default_sender: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inter_message_delay: Duration::from_millis(100),
            stale_claim_after: Some(chrono::Duration::minutes(15)),
            default_sender: "noreply@localhost".to_string(),
        }
    }
}

/// What started a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTrigger {
    Scheduled,
    Api,
}

impl PassTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassTrigger::Scheduled => "scheduled",
            PassTrigger::Api => "api",
        }
    }
}

/// Aggregate result of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSummary {
    pub success: bool,
    /// Messages this pass claimed
    pub processed: u32,
    pub sent: u32,
    pub failed: u32,
    pub retried: u32,
    /// Claimed messages whose outcome could not be stored
    pub errored: u32,
    /// Due messages another pass claimed first
    pub skipped: u32,
    pub stale_released: u64,
    pub execution_time_ms: u64,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Failed to fetch due messages: {0}")]
    Fetch(#[source] StoreError),
}

enum MessageResult {
    Sent,
    Retried,
    Failed,
    Errored,
    Skipped,
}

pub struct QueueProcessor {
    store: Arc<dyn EmailQueueStore>,
    transport: Arc<dyn EmailTransport>,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn EmailQueueStore>,
        transport: Arc<dyn EmailTransport>,
        clock: Arc<dyn Clock>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run one processing pass.
    ///
    /// # Errors
    ///
    /// Only a failure to fetch the batch fails the pass.
    #[tracing::instrument(name = "queue_pass", skip_all, fields(trigger = trigger.as_str()))]
    pub async fn run_pass(&self, trigger: PassTrigger) -> Result<ProcessingSummary, ProcessorError> {
        let started = Instant::now();
        let mut summary = ProcessingSummary::default();

        summary.stale_released = self.release_stale_claims().await;

        let batch = self
            .store
            .fetch_due(self.clock.now(), self.config.batch_size)
            .await
            .map_err(ProcessorError::Fetch)?;

        if !batch.is_empty() {
            tracing::info!(due = batch.len(), "Processing email queue batch");
        }

        for (index, message) in batch.into_iter().enumerate() {
            if index > 0 && !self.config.inter_message_delay.is_zero() {
                tokio::time::sleep(self.config.inter_message_delay).await;
            }

            let span = tracing::info_span!(
                "deliver",
                message_id = %message.id,
                priority = %message.priority,
                attempts = message.attempts
            );
            match self.process_message(message).instrument(span).await {
                MessageResult::Sent => summary.sent += 1,
                MessageResult::Retried => summary.retried += 1,
                MessageResult::Failed => summary.failed += 1,
                MessageResult::Errored => summary.errored += 1,
                MessageResult::Skipped => {
                    summary.skipped += 1;
                    continue;
                }
            }
            summary.processed += 1;
        }

        summary.success = true;
        summary.execution_time_ms = started.elapsed().as_millis() as u64;
        EmailMetrics::record_pass(trigger.as_str(), started.elapsed().as_secs_f64());

        tracing::info!(
            processed = summary.processed,
            sent = summary.sent,
            retried = summary.retried,
            failed = summary.failed,
            errored = summary.errored,
            skipped = summary.skipped,
            execution_time_ms = summary.execution_time_ms,
            "Email queue pass complete"
        );

        Ok(summary)
    }

    async fn release_stale_claims(&self) -> u64 {
        let Some(stale_after) = self.config.stale_claim_after else {
            return 0;
        };

        let now = self.clock.now();
        match self.store.release_stale_claims(now - stale_after, now).await {
            Ok(0) => 0,
            Ok(released) => {
                EmailMetrics::record_stale_released(released);
                tracing::warn!(released, "Released stale sending claims for retry");
                released
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to release stale claims, continuing pass");
                0
            }
        }
    }

    async fn process_message(&self, message: QueuedMessage) -> MessageResult {
        let claimed = match self.store.claim(message.id, self.clock.now()).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                tracing::debug!("Message already claimed by another pass");
                return MessageResult::Skipped;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to claim message");
                return MessageResult::Skipped;
            }
        };

        let attempts = claimed.attempts + 1;
        let email = OutboundEmail::from_message(&claimed, &self.config.default_sender);
        let send_started = Instant::now();
        let sent = self.transport.send(&email).await;
        let now = self.clock.now();

        match sent {
            Ok(receipt) => {
                let outcome = DeliveryOutcome::Sent {
                    provider_message_id: receipt.provider_message_id,
                };
                match self.store.record_outcome(claimed.id, attempts, outcome, now).await {
                    Ok(_) => {
                        EmailMetrics::record_sent(send_started.elapsed().as_secs_f64());
                        tracing::info!(attempts, "Email sent");
                        MessageResult::Sent
                    }
                    Err(e) => {
                        // The provider has the message; a retry may deliver it twice
                        tracing::error!(error = %e, "Email sent but delivery could not be recorded");
                        self.record_failure(&claimed, attempts, format!("Failed to record delivery: {}", e), now)
                            .await
                    }
                }
            }
            Err(e) => self.record_failure(&claimed, attempts, e.to_string(), now).await,
        }
    }

    async fn record_failure(
        &self,
        message: &QueuedMessage,
        attempts: u32,
        error: String,
        now: DateTime<Utc>,
    ) -> MessageResult {
        let (outcome, result) = if attempts >= message.max_retries {
            (DeliveryOutcome::Failed { error: error.clone() }, MessageResult::Failed)
        } else {
            let next_retry_at = now + retry_delay_for(attempts);
            (
                DeliveryOutcome::Retry {
                    error: error.clone(),
                    next_retry_at,
                },
                MessageResult::Retried,
            )
        };

        match self.store.record_outcome(message.id, attempts, outcome, now).await {
            Ok(updated) => {
                match result {
                    MessageResult::Failed => {
                        EmailMetrics::record_failed();
                        tracing::warn!(attempts, error = %error, "Email permanently failed");
                    }
                    _ => {
                        EmailMetrics::record_retry_scheduled();
                        tracing::info!(
                            attempts,
                            next_retry_at = %updated.next_retry_at,
                            error = %error,
                            "Email delivery failed, retry scheduled"
                        );
                    }
                }
                result
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    delivery_error = %error,
                    "Failed to record delivery failure, message left for stale-claim recovery"
                );
                MessageResult::Errored
            }
        }
    }
}
