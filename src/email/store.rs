//! Storage abstraction for the email queue.
//!
//! Backends must make [`EmailQueueStore::claim`] and
//! [`EmailQueueStore::record_outcome`] conditional on the row's current
//! status, so two passes can never both own a message and a terminal
//! message is never rewritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{DeliveryOutcome, NewMessage, QueuedMessage, StoreError, StoreStats};

/// Durable email queue.
///
/// # Thread Safety
///
/// Implementations are shared across tasks behind an `Arc` and must be
/// `Send + Sync`.
#[async_trait]
pub trait EmailQueueStore: Send + Sync {
    /// Validate and insert a new message with `status=queued`.
    async fn insert(&self, message: NewMessage, now: DateTime<Utc>) -> Result<QueuedMessage, StoreError>;

    /// Messages in `queued` or `retry` whose `next_retry_at <= now`,
    /// highest priority first, oldest first within a priority.
    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedMessage>, StoreError>;

    /// Atomically move a message from `queued`/`retry` to `sending`.
    ///
    /// Returns `None` when the message is no longer claimable, typically
    /// because a concurrent pass got there first.
    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<QueuedMessage>, StoreError>;

    /// Apply the outcome of a delivery attempt to a message in `sending`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTransition` if the message is not in
    /// `sending` and `StoreError::NotFound` if it does not exist.
    async fn record_outcome(
        &self,
        id: Uuid,
        attempts: u32,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessage, StoreError>;

    /// Return messages stuck in `sending` since before `older_than` to
    /// `retry`, due at `now`. Returns the number of messages released.
    async fn release_stale_claims(&self, older_than: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<QueuedMessage>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Cheap connectivity probe
    async fn ping(&self) -> Result<(), StoreError>;

    /// Backend identifier for health output
    fn backend_type(&self) -> &'static str;
}
