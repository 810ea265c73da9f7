use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::emails::{enqueue_email, get_email};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::queue::process_queue;

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health, stats and scraping stay unauthenticated
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                .route("/emails", post(enqueue_email))
                .route("/emails/{id}", get(get_email))
                .route("/queue/process", post(process_queue))
                .route_layer(middleware::from_fn_with_state(state, api_key_auth)),
        )
}
