//! Retry executor with exponential backoff and jitter

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::circuit_breaker::CircuitBreaker;
use super::error::{ErrorKind, QueryError, ResilienceError};
use crate::metrics::ResilienceMetrics;

/// Fraction of the computed delay added as random jitter
const JITTER_FACTOR: f64 = 0.3;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry (ms)
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay (ms)
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub backoff_multiplier: f64,
    /// Error kinds treated as transient
    pub retryable: HashSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            retryable: ErrorKind::transient(),
        }
    }
}

impl RetryConfig {
    /// Whether the error should consume another attempt
    pub fn is_retryable(&self, err: &ResilienceError) -> bool {
        match err {
            ResilienceError::Query(e) => self.retryable.contains(&e.kind),
            _ => false,
        }
    }

    /// Delay before retry number `attempt + 1`, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = rand::rng().random::<f64>() * JITTER_FACTOR * base.as_millis() as f64;
        base + Duration::from_millis(jitter as u64)
    }
}

/// Results of a batch, partitioned by outcome and tagged with input index
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub succeeded: Vec<(usize, T)>,
    pub failed: Vec<(usize, ResilienceError)>,
}

impl<T> BatchOutcome<T> {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs operations with bounded retries, consulting a shared circuit breaker.
pub struct RetryExecutor {
    breaker: Arc<CircuitBreaker>,
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(breaker: Arc<CircuitBreaker>, config: RetryConfig) -> Self {
        Self { breaker, config }
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` with the executor's default configuration
    pub async fn query_with_retry<T, F, Fut>(&self, operation: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        self.query_with_retry_config(operation, &self.config).await
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or `config.max_retries` retries have been spent.
    pub async fn query_with_retry_config<T, F, Fut>(
        &self,
        mut operation: F,
        config: &RetryConfig,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        let mut attempt = 0u32;

        loop {
            let err = match self.breaker.execute(&mut operation).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(attempt, "Query recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !config.is_retryable(&err) {
                tracing::debug!(attempt, error = %err, "Non-retryable query error");
                return Err(err);
            }

            if attempt >= config.max_retries {
                tracing::warn!(
                    attempts = attempt + 1,
                    error = %err,
                    "Query failed after exhausting retries"
                );
                return Err(match err {
                    ResilienceError::Query(last) => ResilienceError::RetriesExhausted {
                        attempts: attempt + 1,
                        last,
                    },
                    other => other,
                });
            }

            let delay = config.jittered_delay(attempt);
            if let Some(kind) = err.kind() {
                ResilienceMetrics::record_retry(kind);
            }
            tracing::warn!(
                attempt = attempt + 1,
                max_retries = config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient query error, retrying"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Run independent operations concurrently, each with its own retries.
    ///
    /// A failure in one operation never fails the batch.
    pub async fn batch_query_with_retry<T, F, Fut, I>(&self, operations: I) -> BatchOutcome<T>
    where
        I: IntoIterator<Item = F>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        let results = join_all(
            operations
                .into_iter()
                .map(|operation| self.query_with_retry(operation)),
        )
        .await;

        let mut outcome = BatchOutcome {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(value) => outcome.succeeded.push((index, value)),
                Err(err) => outcome.failed.push((index, err)),
            }
        }

        if !outcome.failed.is_empty() {
            tracing::warn!(
                succeeded = outcome.succeeded.len(),
                failed = outcome.failed.len(),
                "Batch query completed with failures"
            );
        }

        outcome
    }
}

/// Run `operation` with a deadline.
///
/// The operation receives a cancellation token that is cancelled when the
/// deadline passes. Cancellation only stops waiting; work already handed to
/// the network may still complete.
pub async fn with_timeout<T, F, Fut>(timeout: Duration, operation: F) -> Result<T, ResilienceError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ResilienceError>>,
{
    let token = CancellationToken::new();
    let guard = token.clone();

    match tokio::time::timeout(timeout, operation(token)).await {
        Ok(result) => result,
        Err(_) => {
            guard.cancel();
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Query timed out");
            Err(ResilienceError::QueryTimeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(max_retries: u32) -> RetryExecutor {
        let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 100,
            ..Default::default()
        }));
        RetryExecutor::new(
            breaker,
            RetryConfig {
                max_retries,
                initial_delay_ms: 10,
                max_delay_ms: 100,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay(0), Duration::from_millis(1000));
        assert_eq!(config.base_delay(1), Duration::from_millis(2000));
        assert_eq!(config.base_delay(2), Duration::from_millis(4000));
        assert_eq!(config.base_delay(3), Duration::from_millis(8000));
        assert_eq!(config.base_delay(4), Duration::from_millis(10_000));
        assert_eq!(config.base_delay(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_stays_within_thirty_percent() {
        let config = RetryConfig::default();
        for attempt in 0..4 {
            let base = config.base_delay(attempt);
            let delay = config.jittered_delay(attempt);
            assert!(delay >= base);
            assert!(delay.as_millis() as f64 <= base.as_millis() as f64 * 1.3 + 1.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_runs_once() {
        let executor = executor(3);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .query_with_retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QueryError::new(ErrorKind::Other, "violates foreign key constraint"))
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Query(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_exhausts_budget() {
        let executor = executor(3);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .query_with_retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QueryError::new(ErrorKind::StatementTimeout, "statement timeout").with_code("57014"))
            })
            .await;

        match result {
            Err(ResilienceError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last.kind, ErrorKind::StatementTimeout);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let executor = executor(3);
        let calls = AtomicU32::new(0);

        let result = executor
            .query_with_retry(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(QueryError::new(ErrorKind::NetworkError, "network error"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_at_least_base_delay() {
        let executor = executor(2);
        let started = tokio::time::Instant::now();

        let _: Result<(), _> = executor
            .query_with_retry(|| async { Err(QueryError::new(ErrorKind::Timeout, "timeout")) })
            .await;

        // 10ms + 20ms before jitter
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_is_not_retried() {
        let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout_ms: 60_000,
        }));
        breaker.record_failure();
        let executor = RetryExecutor::new(breaker, RetryConfig::default());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .query_with_retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_partitions_results() {
        let executor = executor(1);

        let make = |i: u32| {
            move || async move {
                if i % 2 == 0 {
                    Ok(i * 10)
                } else {
                    Err(QueryError::new(ErrorKind::Other, format!("row {i} rejected")))
                }
            }
        };

        let outcome = executor
            .batch_query_with_retry((0..5).map(make))
            .await;

        assert_eq!(outcome.succeeded, vec![(0, 0), (2, 20), (4, 40)]);
        let failed: Vec<usize> = outcome.failed.iter().map(|(i, _)| *i).collect();
        assert_eq!(failed, vec![1, 3]);
        assert!(!outcome.is_complete_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_raises_query_timeout() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(50), |token| async move {
            token.cancelled().await;
            Err(ResilienceError::Query(QueryError::new(ErrorKind::NetworkError, "aborted")))
        })
        .await;

        assert!(matches!(result, Err(ResilienceError::QueryTimeout(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_passes_through_result() {
        let result = with_timeout(Duration::from_secs(1), |_token| async { Ok::<_, ResilienceError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
