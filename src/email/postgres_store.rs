//! PostgreSQL-backed email queue store.
//!
//! Every status change is a single conditional `UPDATE ... RETURNING`, so
//! the row's current status is the lock: a claim only matches
//! `queued`/`retry` rows and an outcome only matches `sending` rows.
//!
//! Table structure (see `migrations/001_email_queue.sql`):
//! - `email_queue` - one row per message, never deleted

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    Attachment, DeliveryOutcome, MessageStatus, NewMessage, QueuedMessage, StoreError, StoreStats,
    PROVIDER_MESSAGE_ID_KEY,
};
use super::store::EmailQueueStore;

const COLUMNS: &str = "id, recipient, sender, subject, html_body, attachments, priority, status, \
    attempts, max_retries, next_retry_at, organization_id, error_message, metadata, \
    created_at, updated_at, sent_at, failed_at";

/// Urgency rank used for ordering; must agree with `Priority`'s `Ord`
const PRIORITY_RANK: &str = "CASE priority \
    WHEN 'urgent' THEN 4 WHEN 'high' THEN 3 WHEN 'normal' THEN 2 ELSE 1 END";

#[derive(Debug, sqlx::FromRow)]
struct EmailRow {
    id: Uuid,
    recipient: String,
    sender: Option<String>,
    subject: String,
    html_body: String,
    attachments: Json<Vec<Attachment>>,
    priority: String,
    status: String,
    attempts: i32,
    max_retries: i32,
    next_retry_at: DateTime<Utc>,
    organization_id: Option<Uuid>,
    error_message: Option<String>,
    metadata: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<EmailRow> for QueuedMessage {
    type Error = StoreError;

    fn try_from(row: EmailRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };

        Ok(QueuedMessage {
            id,
            recipient: row.recipient,
            sender: row.sender,
            subject: row.subject,
            html_body: row.html_body,
            attachments: row.attachments.0,
            priority: row.priority.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            attempts: u32::try_from(row.attempts).map_err(|e| corrupt(e.to_string()))?,
            max_retries: u32::try_from(row.max_retries).map_err(|e| corrupt(e.to_string()))?,
            next_retry_at: row.next_retry_at,
            organization_id: row.organization_id,
            error_message: row.error_message,
            metadata: row.metadata.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
            failed_at: row.failed_at,
        })
    }
}

/// PostgreSQL email queue store
pub struct PostgresEmailStore {
    pool: PgPool,
}

impl PostgresEmailStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain why an outcome update matched no row
    async fn outcome_rejection(&self, id: Uuid) -> StoreError {
        let status: Result<Option<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT status FROM email_queue WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;

        match status {
            Ok(None) => StoreError::NotFound(id),
            Ok(Some((status,))) => match status.parse::<MessageStatus>() {
                Ok(status) => StoreError::InvalidTransition { id, status },
                Err(reason) => StoreError::Corrupt { id, reason },
            },
            Err(e) => StoreError::from(e),
        }
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl EmailQueueStore for PostgresEmailStore {
    async fn insert(&self, message: NewMessage, now: DateTime<Utc>) -> Result<QueuedMessage, StoreError> {
        let message = message.into_message(now)?;

        sqlx::query(
            r#"
            INSERT INTO email_queue (
                id, recipient, sender, subject, html_body, attachments, priority, status,
                attempts, max_retries, next_retry_at, organization_id, error_message, metadata,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NULL, $13, $14, $14)
            "#,
        )
        .bind(message.id)
        .bind(&message.recipient)
        .bind(&message.sender)
        .bind(&message.subject)
        .bind(&message.html_body)
        .bind(Json(&message.attachments))
        .bind(message.priority.as_str())
        .bind(message.status.as_str())
        .bind(to_i32(message.attempts))
        .bind(to_i32(message.max_retries))
        .bind(message.next_retry_at)
        .bind(message.organization_id)
        .bind(Json(&message.metadata))
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::trace!(message_id = %message.id, priority = %message.priority, "Message queued in PostgreSQL");
        Ok(message)
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedMessage>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM email_queue \
             WHERE status IN ('queued', 'retry') AND next_retry_at <= $1 \
             ORDER BY {PRIORITY_RANK} DESC, created_at ASC, id ASC \
             LIMIT $2"
        );

        let rows: Vec<EmailRow> = sqlx::query_as(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(QueuedMessage::try_from).collect()
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<QueuedMessage>, StoreError> {
        let sql = format!(
            "UPDATE email_queue SET status = 'sending', updated_at = $2 \
             WHERE id = $1 AND status IN ('queued', 'retry') AND next_retry_at <= $2 \
             RETURNING {COLUMNS}"
        );

        let row: Option<EmailRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueuedMessage::try_from).transpose()
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        attempts: u32,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessage, StoreError> {
        let row: Option<EmailRow> = match outcome {
            DeliveryOutcome::Sent { provider_message_id } => {
                let sql = format!(
                    "UPDATE email_queue SET status = 'sent', attempts = $2, sent_at = $3, updated_at = $3, \
                     metadata = CASE WHEN $4::text IS NULL THEN metadata \
                                ELSE metadata || jsonb_build_object('{PROVIDER_MESSAGE_ID_KEY}', $4::text) END \
                     WHERE id = $1 AND status = 'sending' \
                     RETURNING {COLUMNS}"
                );
                sqlx::query_as(&sql)
                    .bind(id)
                    .bind(to_i32(attempts))
                    .bind(now)
                    .bind(provider_message_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            DeliveryOutcome::Retry { error, next_retry_at } => {
                let sql = format!(
                    "UPDATE email_queue SET status = 'retry', attempts = $2, error_message = $3, \
                     next_retry_at = $4, updated_at = $5 \
                     WHERE id = $1 AND status = 'sending' \
                     RETURNING {COLUMNS}"
                );
                sqlx::query_as(&sql)
                    .bind(id)
                    .bind(to_i32(attempts))
                    .bind(error)
                    .bind(next_retry_at)
                    .bind(now)
                    .fetch_optional(&self.pool)
                    .await?
            }
            DeliveryOutcome::Failed { error } => {
                let sql = format!(
                    "UPDATE email_queue SET status = 'failed', attempts = $2, error_message = $3, \
                     failed_at = $4, updated_at = $4 \
                     WHERE id = $1 AND status = 'sending' \
                     RETURNING {COLUMNS}"
                );
                sqlx::query_as(&sql)
                    .bind(id)
                    .bind(to_i32(attempts))
                    .bind(error)
                    .bind(now)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        match row {
            Some(row) => QueuedMessage::try_from(row),
            None => Err(self.outcome_rejection(id).await),
        }
    }

    async fn release_stale_claims(&self, older_than: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue SET status = 'retry', next_retry_at = $2, updated_at = $2
            WHERE status = 'sending' AND updated_at < $1
            "#,
        )
        .bind(older_than)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueuedMessage>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM email_queue WHERE id = $1");
        let row: Option<EmailRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueuedMessage::try_from).transpose()
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM email_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = StoreStats::default();
        for (status, count) in counts {
            let count = u64::try_from(count).unwrap_or(0);
            match status.parse::<MessageStatus>() {
                Ok(MessageStatus::Queued) => stats.queued = count,
                Ok(MessageStatus::Sending) => stats.sending = count,
                Ok(MessageStatus::Sent) => stats.sent = count,
                Ok(MessageStatus::Retry) => stats.retry = count,
                Ok(MessageStatus::Failed) => stats.failed = count,
                Err(reason) => tracing::warn!(%reason, count, "Ignoring rows with unknown status"),
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
