//! In-memory email queue store.
//!
//! Rows live in a `DashMap`; status transitions happen under the shard's
//! write lock via `get_mut`, which gives the same compare-and-swap
//! semantics as the conditional updates of the Postgres store.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::models::{
    DeliveryOutcome, MessageStatus, NewMessage, QueuedMessage, StoreError, StoreStats,
    PROVIDER_MESSAGE_ID_KEY,
};
use super::store::EmailQueueStore;

struct Entry {
    /// Insertion order, breaks ties between equal `created_at`
    seq: u64,
    message: QueuedMessage,
}

/// In-memory store. Contents are lost on restart.
pub struct MemoryEmailStore {
    rows: DashMap<Uuid, Entry>,
    next_seq: AtomicU64,
}

impl MemoryEmailStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Default for MemoryEmailStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply an outcome to a message already known to be in `sending`
pub(crate) fn apply_outcome(message: &mut QueuedMessage, attempts: u32, outcome: DeliveryOutcome, now: DateTime<Utc>) {
    message.attempts = attempts;
    message.updated_at = now;
    match outcome {
        DeliveryOutcome::Sent { provider_message_id } => {
            message.status = MessageStatus::Sent;
            message.sent_at = Some(now);
            if let Some(provider_id) = provider_message_id {
                message
                    .metadata
                    .insert(PROVIDER_MESSAGE_ID_KEY.to_string(), Value::String(provider_id));
            }
        }
        DeliveryOutcome::Retry { error, next_retry_at } => {
            message.status = MessageStatus::Retry;
            message.error_message = Some(error);
            message.next_retry_at = next_retry_at;
        }
        DeliveryOutcome::Failed { error } => {
            message.status = MessageStatus::Failed;
            message.error_message = Some(error);
            message.failed_at = Some(now);
        }
    }
}

#[async_trait]
impl EmailQueueStore for MemoryEmailStore {
    async fn insert(&self, message: NewMessage, now: DateTime<Utc>) -> Result<QueuedMessage, StoreError> {
        let message = message.into_message(now)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.rows.insert(
            message.id,
            Entry {
                seq,
                message: message.clone(),
            },
        );

        tracing::trace!(message_id = %message.id, priority = %message.priority, "Message queued in memory");
        Ok(message)
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedMessage>, StoreError> {
        let mut due: Vec<(u64, QueuedMessage)> = self
            .rows
            .iter()
            .filter(|entry| entry.message.is_due(now))
            .map(|entry| (entry.seq, entry.message.clone()))
            .collect();

        due.sort_by(|(seq_a, a), (seq_b, b)| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(seq_a.cmp(seq_b))
        });
        due.truncate(limit);

        Ok(due.into_iter().map(|(_, message)| message).collect())
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<QueuedMessage>, StoreError> {
        let Some(mut entry) = self.rows.get_mut(&id) else {
            return Ok(None);
        };
        if !entry.message.is_due(now) {
            return Ok(None);
        }

        entry.message.status = MessageStatus::Sending;
        entry.message.updated_at = now;
        Ok(Some(entry.message.clone()))
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        attempts: u32,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessage, StoreError> {
        let mut entry = self.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.message.status != MessageStatus::Sending {
            return Err(StoreError::InvalidTransition {
                id,
                status: entry.message.status,
            });
        }

        apply_outcome(&mut entry.message, attempts, outcome, now);
        Ok(entry.message.clone())
    }

    async fn release_stale_claims(&self, older_than: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut released = 0;
        for mut entry in self.rows.iter_mut() {
            let message = &mut entry.message;
            if message.status == MessageStatus::Sending && message.updated_at < older_than {
                message.status = MessageStatus::Retry;
                message.next_retry_at = now;
                message.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueuedMessage>, StoreError> {
        Ok(self.rows.get(&id).map(|entry| entry.message.clone()))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();
        for entry in self.rows.iter() {
            stats.count(entry.message.status);
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::models::Priority;
    use std::sync::Arc;

    fn message(subject: &str, priority: Priority) -> NewMessage {
        NewMessage::new("owner@example.com", subject, "<p>body</p>").with_priority(priority)
    }

    #[tokio::test]
    async fn test_fetch_due_orders_by_priority_then_age() {
        let store = MemoryEmailStore::new();
        let now = Utc::now();

        store.insert(message("low", Priority::Low), now).await.unwrap();
        store.insert(message("normal-1", Priority::Normal), now).await.unwrap();
        store.insert(message("urgent", Priority::Urgent), now).await.unwrap();
        store.insert(message("normal-2", Priority::Normal), now).await.unwrap();

        let due = store.fetch_due(now, 50).await.unwrap();
        let subjects: Vec<_> = due.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["urgent", "normal-1", "normal-2", "low"]);
    }

    #[tokio::test]
    async fn test_fetch_due_respects_limit_and_schedule() {
        let store = MemoryEmailStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store.insert(message(&format!("m{}", i), Priority::Normal), now).await.unwrap();
        }
        store
            .insert(
                message("later", Priority::Urgent).with_send_after(now + chrono::Duration::hours(1)),
                now,
            )
            .await
            .unwrap();

        let due = store.fetch_due(now, 3).await.unwrap();
        assert_eq!(due.len(), 3);
        assert!(due.iter().all(|m| m.subject != "later"));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = Arc::new(MemoryEmailStore::new());
        let now = Utc::now();
        let msg = store.insert(message("race", Priority::High), now).await.unwrap();

        let claims = futures::future::join_all((0..8).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim(msg.id, now).await.unwrap() })
        }))
        .await;

        let winners = claims
            .into_iter()
            .filter(|claim| claim.as_ref().unwrap().is_some())
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.get(msg.id).await.unwrap().unwrap().status, MessageStatus::Sending);
    }

    #[tokio::test]
    async fn test_terminal_rows_reject_outcomes() {
        let store = MemoryEmailStore::new();
        let now = Utc::now();
        let msg = store.insert(message("done", Priority::Normal), now).await.unwrap();

        store.claim(msg.id, now).await.unwrap().unwrap();
        store
            .record_outcome(
                msg.id,
                1,
                DeliveryOutcome::Sent {
                    provider_message_id: Some("prov-1".to_string()),
                },
                now,
            )
            .await
            .unwrap();

        let again = store
            .record_outcome(msg.id, 2, DeliveryOutcome::Failed { error: "late".to_string() }, now)
            .await;
        assert!(matches!(
            again,
            Err(StoreError::InvalidTransition {
                status: MessageStatus::Sent,
                ..
            })
        ));
        assert!(store.claim(msg.id, now).await.unwrap().is_none());

        let stored = store.get(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.provider_message_id(), Some("prov-1"));
        assert!(stored.sent_at.is_some());
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_release_stale_claims() {
        let store = MemoryEmailStore::new();
        let start = Utc::now();
        let msg = store.insert(message("stuck", Priority::Normal), start).await.unwrap();
        store.claim(msg.id, start).await.unwrap().unwrap();

        let later = start + chrono::Duration::minutes(20);
        let released = store
            .release_stale_claims(later - chrono::Duration::minutes(15), later)
            .await
            .unwrap();
        assert_eq!(released, 1);

        let stored = store.get(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Retry);
        assert_eq!(stored.attempts, 0);
        assert!(stored.is_due(later));
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let store = MemoryEmailStore::new();
        let now = Utc::now();
        let a = store.insert(message("a", Priority::Normal), now).await.unwrap();
        store.insert(message("b", Priority::Normal), now).await.unwrap();
        store.claim(a.id, now).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.sending, 1);
        assert_eq!(stats.total(), 2);
    }
}
