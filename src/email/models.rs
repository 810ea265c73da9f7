//! Email queue data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::resilience::{ErrorKind, QueryError};

/// Attempts allowed when the producer does not set a ceiling
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Metadata key holding the transport's message id after a successful send
pub const PROVIDER_MESSAGE_ID_KEY: &str = "provider_message_id";

/// Dequeue priority. Ordering follows urgency, so `Urgent` is the greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Delivery status of a queued message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Sending,
    Sent,
    Retry,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Retry => "retry",
            MessageStatus::Failed => "failed",
        }
    }

    /// Whether a processing pass may pick this message up
    pub fn is_claimable(&self) -> bool {
        matches!(self, MessageStatus::Queued | MessageStatus::Retry)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::Failed)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(MessageStatus::Queued),
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "retry" => Ok(MessageStatus::Retry),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// File attached to an outbound email; `content` is base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub content: String,
    pub content_type: String,
}

/// A durable unit of outbound email work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: Uuid,
    pub recipient: String,
    pub sender: Option<String>,
    #[serde(default)]
    pub subject: String,
    pub html_body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub priority: Priority,
    pub status: MessageStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub next_retry_at: DateTime<Utc>,
    pub organization_id: Option<Uuid>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl QueuedMessage {
    /// Whether the message is eligible for a pass running at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_retry_at <= now
    }

    pub fn provider_message_id(&self) -> Option<&str> {
        self.metadata
            .get(PROVIDER_MESSAGE_ID_KEY)
            .and_then(Value::as_str)
    }
}

/// Message submitted by a producer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub html_body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Earliest delivery time for scheduled reminders
    #[serde(default)]
    pub send_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NewMessage {
    pub fn new(recipient: impl Into<String>, subject: impl Into<String>, html_body: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            html_body: html_body.into(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_send_after(mut self, at: DateTime<Utc>) -> Self {
        self.send_after = Some(at);
        self
    }

    /// Only transport-relevant fields are checked; content is the producer's business.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.recipient.trim().is_empty() {
            return Err(StoreError::Validation("recipient must not be empty".to_string()));
        }
        if self.subject.trim().is_empty() {
            return Err(StoreError::Validation("subject must not be empty".to_string()));
        }
        if self.max_retries == Some(0) {
            return Err(StoreError::Validation("maxRetries must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Validate and build the stored row, queued and due at `send_after` or `now`
    pub fn into_message(self, now: DateTime<Utc>) -> Result<QueuedMessage, StoreError> {
        self.validate()?;
        Ok(QueuedMessage {
            id: Uuid::new_v4(),
            recipient: self.recipient.trim().to_string(),
            sender: self.sender.filter(|s| !s.trim().is_empty()),
            subject: self.subject,
            html_body: self.html_body,
            attachments: self.attachments,
            priority: self.priority,
            status: MessageStatus::Queued,
            attempts: 0,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            next_retry_at: self.send_after.unwrap_or(now),
            organization_id: self.organization_id,
            error_message: None,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
            sent_at: None,
            failed_at: None,
        })
    }
}

/// Result of one delivery attempt, applied to a claimed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { provider_message_id: Option<String> },
    Retry { error: String, next_retry_at: DateTime<Utc> },
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn status(&self) -> MessageStatus {
        match self {
            DeliveryOutcome::Sent { .. } => MessageStatus::Sent,
            DeliveryOutcome::Retry { .. } => MessageStatus::Retry,
            DeliveryOutcome::Failed { .. } => MessageStatus::Failed,
        }
    }
}

/// Message counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub queued: u64,
    pub sending: u64,
    pub sent: u64,
    pub retry: u64,
    pub failed: u64,
}

impl StoreStats {
    pub fn total(&self) -> u64 {
        self.queued + self.sending + self.sent + self.retry + self.failed
    }

    pub(crate) fn count(&mut self, status: MessageStatus) {
        match status {
            MessageStatus::Queued => self.queued += 1,
            MessageStatus::Sending => self.sending += 1,
            MessageStatus::Sent => self.sent += 1,
            MessageStatus::Retry => self.retry += 1,
            MessageStatus::Failed => self.failed += 1,
        }
    }
}

/// Email queue store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Message {0} not found")]
    NotFound(Uuid),

    /// The row was not in `sending` when an outcome was recorded
    #[error("Message {id} is {status}, expected sending")]
    InvalidTransition { id: Uuid, status: MessageStatus },

    #[error("Message {id} has an unreadable row: {reason}")]
    Corrupt { id: Uuid, reason: String },

    #[error("Store query failed: {0}")]
    Query(#[from] QueryError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Query(QueryError::from(err))
    }
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Query(e) => e,
            other => QueryError::new(ErrorKind::Other, other.to_string()),
        }
    }
}
