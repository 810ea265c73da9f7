//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::email::StoreStats;
use crate::error::Result;
use crate::resilience::CircuitState;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: StoreHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresHealthResponse>,
    pub circuit_breaker: CircuitBreakerResponse,
    pub offline_queue: OfflineQueueResponse,
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub backend: String,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct PostgresHealthResponse {
    pub pool_size: u32,
    pub idle_connections: u32,
}

#[derive(Debug, Serialize)]
pub struct CircuitBreakerResponse {
    pub state: String,
    pub failure_count: u32,
    pub success_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_time_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OfflineQueueResponse {
    pub online: bool,
    pub depth: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub queue: StoreStats,
    pub total: u64,
    pub circuit_breaker: CircuitBreakerResponse,
    pub offline_queue: OfflineQueueResponse,
}

fn circuit_breaker_response(state: &AppState) -> CircuitBreakerResponse {
    let stats = state.executor.circuit_breaker().stats();
    CircuitBreakerResponse {
        state: stats.state.as_str().to_string(),
        failure_count: stats.failure_count,
        success_count: stats.success_count,
        last_failure_time_ms: stats.last_failure_time_ms,
    }
}

fn offline_queue_response(state: &AppState) -> OfflineQueueResponse {
    OfflineQueueResponse {
        online: state.offline_queue.is_online(),
        depth: state.offline_queue.queue_depth(),
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check store ping failed");
            false
        }
    };

    let postgres = state.postgres_pool.as_ref().map(|pool| {
        let inner_pool = pool.pool();
        PostgresHealthResponse {
            pool_size: inner_pool.size(),
            idle_connections: inner_pool.num_idle() as u32,
        }
    });

    let circuit_breaker = circuit_breaker_response(&state);
    let healthy = connected && circuit_breaker.state == CircuitState::Closed.as_str();
    let status = if healthy { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store: StoreHealthResponse {
            backend: state.store.backend_type().to_string(),
            connected,
        },
        postgres,
        circuit_breaker,
        offline_queue: offline_queue_response(&state),
    })
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let queue = state.store.stats().await?;

    Ok(Json(StatsResponse {
        total: queue.total(),
        queue,
        circuit_breaker: circuit_breaker_response(&state),
        offline_queue: offline_queue_response(&state),
    }))
}
