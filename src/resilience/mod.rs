//! Resilient query layer
//!
//! Protects calls to the backing database with a circuit breaker, bounded
//! exponential-backoff retries and an offline queue that defers work while
//! connectivity is down.
//!
//! # Modules
//!
//! - `CircuitBreaker`: Short-circuits calls to an unhealthy dependency
//! - `RetryExecutor`: Retries transient failures with backoff and jitter
//! - `OfflineQueue`: Buffers operations while offline and replays them in order
//! - `QueryError`: Typed error taxonomy produced by database adapters
//!
//! All three components are explicitly constructed and shared through `Arc`,
//! one set per client, so tests and tenants never share breaker state.

mod circuit_breaker;
mod error;
mod offline;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use error::{ErrorKind, QueryError, ResilienceError};
pub use offline::{Connectivity, OfflineQueue};
pub use retry::{with_timeout, BatchOutcome, RetryConfig, RetryExecutor};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
