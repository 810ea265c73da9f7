//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use warranty_mail_pipeline::email::{
    DeliveryOutcome, EmailQueueStore, EmailTransport, ManualClock, MemoryEmailStore, NewMessage,
    OutboundEmail, ProcessorConfig, QueueProcessor, QueuedMessage, StoreError, StoreStats,
    TransportError, TransportReceipt,
};
use warranty_mail_pipeline::resilience::{ErrorKind, QueryError};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Transport driven by per-subject failure scripts
#[derive(Default)]
pub struct ScriptedTransport {
    /// Remaining failures per subject; `u32::MAX` never recovers
    failures: Mutex<HashMap<String, u32>>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_times(&self, subject: &str, times: u32) {
        self.failures.lock().unwrap().insert(subject.to_string(), times);
    }

    pub fn fail_always(&self, subject: &str) {
        self.fail_times(subject, u32::MAX);
    }

    /// Subjects in the order they were handed to the transport
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for ScriptedTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<TransportReceipt, TransportError> {
        self.attempts.lock().unwrap().push(email.subject.clone());

        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&email.subject) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(TransportError::Rejected {
                    status: 503,
                    message: format!("provider unavailable for {}", email.subject),
                });
            }
        }

        Ok(TransportReceipt {
            provider_message_id: Some(format!("prov-{}", email.subject)),
        })
    }
}

pub fn processor(
    store: Arc<MemoryEmailStore>,
    transport: Arc<ScriptedTransport>,
    clock: Arc<ManualClock>,
) -> QueueProcessor {
    QueueProcessor::new(
        store,
        transport,
        clock,
        ProcessorConfig {
            inter_message_delay: Duration::ZERO,
            ..Default::default()
        },
    )
}

/// Store whose every operation fails as if the database were down
pub struct UnreachableStore;

fn refused() -> StoreError {
    QueryError::new(ErrorKind::ConnectionRefused, "connection refused").into()
}

#[async_trait]
impl EmailQueueStore for UnreachableStore {
    async fn insert(&self, _message: NewMessage, _now: DateTime<Utc>) -> Result<QueuedMessage, StoreError> {
        Err(refused())
    }

    async fn fetch_due(&self, _now: DateTime<Utc>, _limit: usize) -> Result<Vec<QueuedMessage>, StoreError> {
        Err(refused())
    }

    async fn claim(&self, _id: Uuid, _now: DateTime<Utc>) -> Result<Option<QueuedMessage>, StoreError> {
        Err(refused())
    }

    async fn record_outcome(
        &self,
        _id: Uuid,
        _attempts: u32,
        _outcome: DeliveryOutcome,
        _now: DateTime<Utc>,
    ) -> Result<QueuedMessage, StoreError> {
        Err(refused())
    }

    async fn release_stale_claims(&self, _older_than: DateTime<Utc>, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        Err(refused())
    }

    async fn get(&self, _id: Uuid) -> Result<Option<QueuedMessage>, StoreError> {
        Err(refused())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Err(refused())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(refused())
    }

    fn backend_type(&self) -> &'static str {
        "unreachable"
    }
}
