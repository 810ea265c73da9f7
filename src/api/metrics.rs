//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::metrics::{self, EmailMetrics, ResilienceMetrics};
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state).await;

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh gauges that are sampled rather than counted
async fn update_metrics_from_state(state: &AppState) {
    match state.store.stats().await {
        Ok(stats) => EmailMetrics::set_queue_stats(&stats),
        Err(e) => tracing::warn!(error = %e, "Skipping queue gauges, store stats unavailable"),
    }

    ResilienceMetrics::set_circuit_state(state.executor.circuit_breaker().state());
    ResilienceMetrics::set_offline_queue_depth(state.offline_queue.queue_depth());
    ResilienceMetrics::set_online(state.offline_queue.is_online());
}
