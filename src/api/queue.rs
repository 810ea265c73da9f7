//! Manual queue processing trigger.

use std::error::Error as _;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::email::PassTrigger;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct PassFailureResponse {
    pub success: bool,
    pub error: String,
    pub stack: Vec<String>,
}

/// POST /api/v1/queue/process
pub async fn process_queue(State(state): State<AppState>) -> Response {
    match state.processor.run_pass(PassTrigger::Api).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => {
            let mut stack = Vec::new();
            let mut source = e.source();
            while let Some(cause) = source {
                stack.push(cause.to_string());
                source = cause.source();
            }

            tracing::error!(error = %e, "Queue pass failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PassFailureResponse {
                    success: false,
                    error: e.to_string(),
                    stack,
                }),
            )
                .into_response()
        }
    }
}
