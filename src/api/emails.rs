//! Email intake and lookup.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::email::{MessageStatus, NewMessage, Priority, QueuedMessage};
use crate::error::{AppError, Result};
use crate::metrics::EmailMetrics;
use crate::resilience::{with_timeout, QueryError};
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub id: Uuid,
    pub status: MessageStatus,
    pub priority: Priority,
    pub next_retry_at: DateTime<Utc>,
}

/// POST /api/v1/emails
///
/// The insert runs through the offline queue, so a request made while the
/// store is unreachable waits for replay until the request timeout.
pub async fn enqueue_email(
    State(state): State<AppState>,
    Json(message): Json<NewMessage>,
) -> Result<(StatusCode, Json<EnqueueResponse>)> {
    message.validate()?;

    let store = state.store.clone();
    let clock = state.clock.clone();
    let offline_queue = state.offline_queue.clone();

    let queued = with_timeout(state.settings.api.request_timeout(), |_cancel| async move {
        offline_queue
            .execute(move || {
                let store = store.clone();
                let message = message.clone();
                let now = clock.now();
                async move { store.insert(message, now).await.map_err(QueryError::from) }
            })
            .await
    })
    .await?;

    EmailMetrics::record_enqueued(queued.priority);
    tracing::info!(
        message_id = %queued.id,
        priority = queued.priority.as_str(),
        next_retry_at = %queued.next_retry_at,
        "Email queued"
    );

    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            id: queued.id,
            status: queued.status,
            priority: queued.priority,
            next_retry_at: queued.next_retry_at,
        }),
    ))
}

/// GET /api/v1/emails/{id}
pub async fn get_email(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<QueuedMessage>> {
    let store = state.store.clone();
    let message = state
        .executor
        .query_with_retry(move || {
            let store = store.clone();
            async move { store.get(id).await.map_err(QueryError::from) }
        })
        .await?;

    message
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Email {} not found", id)))
}
