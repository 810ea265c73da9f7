//! Circuit breaker pattern implementation for backend queries

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use super::current_time_ms;
use super::error::{QueryError, ResilienceError};
use crate::metrics::ResilienceMetrics;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed, requests flow through normally
    Closed = 0,
    /// Circuit is open, requests are rejected
    Open = 1,
    /// Circuit is half-open, allowing probe requests
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes in half-open state before closing
    pub success_threshold: u32,
    /// Cooldown after the last failure before a probe is allowed (ms)
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 60_000, // 60 seconds
        }
    }
}

/// Circuit breaker guarding a single upstream dependency.
///
/// State lives in atomics so one breaker can be shared across tasks
/// through an `Arc`. The breaker only gates calls; it never retries.
pub struct CircuitBreaker {
    /// Current state (0=Closed, 1=Open, 2=HalfOpen)
    state: AtomicU8,
    /// Consecutive failure count
    failure_count: AtomicU32,
    /// Consecutive success count (in half-open state)
    success_count: AtomicU32,
    /// Timestamp of the most recent failure (ms since epoch, 0 = never)
    last_failure_time: AtomicI64,
    /// Configuration
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_time: AtomicI64::new(0),
            config,
        }
    }

    /// Get the current state without triggering any transition
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` if the circuit allows it.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and
    /// lets this call through as a probe. Errors from `operation` are
    /// returned unchanged; only a short-circuit produces `CircuitOpen`.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        if !self.allow_request() {
            tracing::debug!(
                failures = self.failure_count.load(Ordering::Acquire),
                "Circuit breaker open, rejecting call"
            );
            return Err(ResilienceError::CircuitOpen);
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(ResilienceError::Query(err))
            }
        }
    }

    /// Check if a request should be allowed, moving Open to HalfOpen once
    /// the cooldown has elapsed.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let last_failure = self.last_failure_time.load(Ordering::Acquire);
                let elapsed = current_time_ms() - last_failure;
                if elapsed < self.config.reset_timeout_ms as i64 {
                    return false;
                }

                if self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.success_count.store(0, Ordering::Release);
                    ResilienceMetrics::set_circuit_state(CircuitState::HalfOpen);
                    tracing::info!(
                        cooldown_ms = elapsed,
                        "Circuit breaker half-open, allowing probe"
                    );
                }
                true
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Release);

        if self.state() == CircuitState::HalfOpen {
            let success_count = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
            if success_count >= self.config.success_threshold {
                self.transition_to(CircuitState::Closed);
                tracing::info!("Circuit breaker closed after successful recovery");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let failure_count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_failure_time
            .store(current_time_ms(), Ordering::Release);

        match self.state() {
            CircuitState::Closed => {
                if failure_count >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                    tracing::warn!(
                        failures = failure_count,
                        "Circuit breaker opened due to failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any failure while probing reopens the circuit
                self.transition_to(CircuitState::Open);
                tracing::warn!("Circuit breaker reopened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Transition to a new state
    fn transition_to(&self, new_state: CircuitState) {
        self.state.store(new_state as u8, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        if new_state == CircuitState::Closed {
            self.failure_count.store(0, Ordering::Release);
        }
        ResilienceMetrics::set_circuit_state(new_state);
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> CircuitBreakerStats {
        let last_failure = self.last_failure_time.load(Ordering::Acquire);
        CircuitBreakerStats {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            last_failure_time_ms: (last_failure > 0).then_some(last_failure),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::ErrorKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn short_cooldown(failure_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold,
            success_threshold: 2,
            reset_timeout_ms: 20,
        })
    }

    async fn failing(calls: &AtomicUsize) -> Result<(), QueryError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(QueryError::new(ErrorKind::ConnectionRefused, "connection refused"))
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::new();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
        assert!(cb.stats().last_failure_time_ms.is_none());
    }

    #[test]
    fn test_circuit_breaker_success_resets_failures() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        cb.record_failure();
        cb.record_failure();
        cb.record_success();

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed); // Still closed, need 3 consecutive
    }

    #[test]
    fn test_open_state_records_last_failure() {
        let cb = short_cooldown(1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.stats().last_failure_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_sixth_call_is_short_circuited() {
        let cb = CircuitBreaker::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..5 {
            let result = cb.execute(|| failing(&calls)).await;
            assert!(matches!(result, Err(ResilienceError::Query(_))));
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb.execute(|| failing(&calls)).await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_errors_propagate_unchanged() {
        let cb = CircuitBreaker::new();
        let result: Result<(), _> = cb
            .execute(|| async { Err(QueryError::new(ErrorKind::Other, "duplicate key").with_code("23505")) })
            .await;

        match result {
            Err(ResilienceError::Query(err)) => {
                assert_eq!(err.kind, ErrorKind::Other);
                assert_eq!(err.code.as_deref(), Some("23505"));
                assert_eq!(err.message, "duplicate key");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_after_cooldown_and_close_on_two_successes() {
        let cb = short_cooldown(5);
        let calls = AtomicUsize::new(0);
        for _ in 0..5 {
            let _ = cb.execute(|| failing(&calls)).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        // State is only re-evaluated when a call is attempted
        assert_eq!(cb.state(), CircuitState::Open);

        let probe = cb.execute(|| async { Ok::<_, QueryError>(1) }).await;
        assert_eq!(probe.unwrap(), 1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.execute(|| async { Ok::<_, QueryError>(2) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let cb = short_cooldown(1);
        let calls = AtomicUsize::new(0);
        let _ = cb.execute(|| failing(&calls)).await;

        std::thread::sleep(Duration::from_millis(30));
        let _ = cb.execute(|| failing(&calls)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cb.state(), CircuitState::Open);

        // Cooldown restarts from the failed probe
        let result = cb.execute(|| failing(&calls)).await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
