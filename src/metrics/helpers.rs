//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CIRCUIT_BREAKER_STATE, DATABASE_ONLINE, DELIVERY_ATTEMPTS_TOTAL, DELIVERY_LATENCY,
    HTTP_REQUESTS_TOTAL, HTTP_REQUEST_LATENCY, OFFLINE_QUEUE_DEPTH, PROCESSOR_PASSES_TOTAL,
    PROCESSOR_PASS_DURATION, QUERY_RETRIES_TOTAL, QUEUE_ENQUEUED_TOTAL, QUEUE_MESSAGES,
    QUEUE_STALE_RELEASED_TOTAL,
};
use crate::email::{Priority, StoreStats};
use crate::resilience::{CircuitState, ErrorKind};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording queue and delivery metrics
pub struct EmailMetrics;

impl EmailMetrics {
    /// Record a message accepted by the API
    pub fn record_enqueued(priority: Priority) {
        QUEUE_ENQUEUED_TOTAL
            .with_label_values(&[priority.as_str()])
            .inc();
    }

    pub fn record_sent(latency_secs: f64) {
        DELIVERY_ATTEMPTS_TOTAL.with_label_values(&["sent"]).inc();
        DELIVERY_LATENCY.observe(latency_secs);
    }

    pub fn record_retry_scheduled() {
        DELIVERY_ATTEMPTS_TOTAL.with_label_values(&["retry"]).inc();
    }

    pub fn record_failed() {
        DELIVERY_ATTEMPTS_TOTAL.with_label_values(&["failed"]).inc();
    }

    /// Record stale claims released back to retry
    pub fn record_stale_released(count: u64) {
        QUEUE_STALE_RELEASED_TOTAL.inc_by(count);
    }

    /// Record a completed processing pass
    pub fn record_pass(trigger: &str, duration_secs: f64) {
        PROCESSOR_PASSES_TOTAL.with_label_values(&[trigger]).inc();
        PROCESSOR_PASS_DURATION.observe(duration_secs);
    }

    /// Update the per-status backlog gauges
    pub fn set_queue_stats(stats: &StoreStats) {
        QUEUE_MESSAGES
            .with_label_values(&["queued"])
            .set(stats.queued as i64);
        QUEUE_MESSAGES
            .with_label_values(&["sending"])
            .set(stats.sending as i64);
        QUEUE_MESSAGES
            .with_label_values(&["retry"])
            .set(stats.retry as i64);
        QUEUE_MESSAGES.with_label_values(&["sent"]).set(stats.sent as i64);
        QUEUE_MESSAGES
            .with_label_values(&["failed"])
            .set(stats.failed as i64);
    }
}

/// Helper struct for circuit breaker, retry and offline queue metrics
pub struct ResilienceMetrics;

impl ResilienceMetrics {
    pub fn set_circuit_state(state: CircuitState) {
        CIRCUIT_BREAKER_STATE.set(state as u8 as i64);
    }

    /// Record a retry scheduled for a transient error
    pub fn record_retry(kind: ErrorKind) {
        QUERY_RETRIES_TOTAL.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn set_offline_queue_depth(depth: usize) {
        OFFLINE_QUEUE_DEPTH.set(depth as i64);
    }

    pub fn set_online(online: bool) {
        DATABASE_ONLINE.set(if online { 1 } else { 0 });
    }
}

/// Helper struct for HTTP request metrics
pub struct HttpMetrics;

impl HttpMetrics {
    pub fn record_request(endpoint: &str, status: u16, latency_secs: f64) {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&[endpoint, &status.to_string()])
            .inc();
        HTTP_REQUEST_LATENCY
            .with_label_values(&[endpoint])
            .observe(latency_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_metrics() {
        EmailMetrics::record_enqueued(Priority::High);
        EmailMetrics::record_sent(0.3);
        EmailMetrics::record_retry_scheduled();
        EmailMetrics::record_failed();
        EmailMetrics::record_stale_released(2);
        EmailMetrics::record_pass("api", 0.8);
        EmailMetrics::set_queue_stats(&StoreStats::default());
        // Just verify no panics
    }

    #[test]
    fn test_resilience_metrics() {
        ResilienceMetrics::set_circuit_state(CircuitState::HalfOpen);
        ResilienceMetrics::record_retry(ErrorKind::Timeout);
        ResilienceMetrics::set_offline_queue_depth(4);
        ResilienceMetrics::set_online(false);
        // Just verify no panics
    }

    #[test]
    fn test_http_metrics() {
        HttpMetrics::record_request("/api/v1/emails", 201, 0.01);
        // Just verify no panics
    }
}
