//! Prometheus metrics for the mail pipeline.
//!
//! - Queue metrics (backlog by status, oldest due message)
//! - Delivery metrics (sent, retried, failed, latency)
//! - Resilience metrics (circuit state, retries, offline backlog)
//! - HTTP metrics

mod helpers;

pub use helpers::{encode_metrics, EmailMetrics, HttpMetrics, ResilienceMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "wmp";

lazy_static! {
    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Messages in the queue by status
    pub static ref QUEUE_MESSAGES: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_queue_messages", METRIC_PREFIX),
        "Messages in the email queue by status",
        &["status"]
    ).unwrap();

    /// Messages enqueued through the API
    pub static ref QUEUE_ENQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_queue_enqueued_total", METRIC_PREFIX),
        "Total messages enqueued",
        &["priority"]
    ).unwrap();

    /// Stale claims returned to the retry pool
    pub static ref QUEUE_STALE_RELEASED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_stale_released_total", METRIC_PREFIX),
        "Total stale sending claims released for retry"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Delivery attempts by outcome (sent, retry, failed)
    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_attempts_total", METRIC_PREFIX),
        "Total delivery attempts by outcome",
        &["outcome"]
    ).unwrap();

    /// Transport call latency
    pub static ref DELIVERY_LATENCY: Histogram = register_histogram!(
        format!("{}_delivery_latency_seconds", METRIC_PREFIX),
        "Email transport latency in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Processing pass duration
    pub static ref PROCESSOR_PASS_DURATION: Histogram = register_histogram!(
        format!("{}_processor_pass_duration_seconds", METRIC_PREFIX),
        "Queue processing pass duration in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    /// Processing passes by trigger (timer, api)
    pub static ref PROCESSOR_PASSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_processor_passes_total", METRIC_PREFIX),
        "Total queue processing passes",
        &["trigger"]
    ).unwrap();

    // ============================================================================
    // Resilience Metrics
    // ============================================================================

    /// Database circuit breaker state (0=closed, 1=open, 2=half-open)
    pub static ref CIRCUIT_BREAKER_STATE: IntGauge = register_int_gauge!(
        format!("{}_circuit_breaker_state", METRIC_PREFIX),
        "Database circuit breaker state (0=closed, 1=open, 2=half-open)"
    ).unwrap();

    /// Query retries by error kind
    pub static ref QUERY_RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_query_retries_total", METRIC_PREFIX),
        "Total query retries by error kind",
        &["kind"]
    ).unwrap();

    /// Operations waiting for connectivity
    pub static ref OFFLINE_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        format!("{}_offline_queue_depth", METRIC_PREFIX),
        "Operations deferred while offline"
    ).unwrap();

    /// Database connectivity (1=online, 0=offline)
    pub static ref DATABASE_ONLINE: IntGauge = register_int_gauge!(
        format!("{}_database_online", METRIC_PREFIX),
        "Database connectivity (1=online, 0=offline)"
    ).unwrap();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// HTTP requests by endpoint and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_http_requests_total", METRIC_PREFIX),
        "Total HTTP requests",
        &["endpoint", "status"]
    ).unwrap();

    /// HTTP request latency
    pub static ref HTTP_REQUEST_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_http_request_latency_seconds", METRIC_PREFIX),
        "HTTP request latency in seconds",
        &["endpoint"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}
