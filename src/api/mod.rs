//! API layer - HTTP endpoint handlers organized by domain.

mod emails;
mod health;
mod metrics;
mod queue;
mod routes;

pub use emails::{enqueue_email, get_email, EnqueueResponse};
pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use queue::{process_queue, PassFailureResponse};
pub use routes::api_routes;
