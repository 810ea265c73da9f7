//! Typed error taxonomy for resilient queries.
//!
//! Adapters translate driver errors into a `QueryError` once, at the edge.
//! Retry classification is then a tag check on `ErrorKind`.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a failed query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The access token presented to the backend has expired
    AuthExpired,
    /// The backend refused the connection
    ConnectionRefused,
    /// The request or connection timed out
    Timeout,
    /// The backend host could not be resolved
    DnsFailure,
    /// Generic network failure
    NetworkError,
    /// The database cancelled a long-running statement
    StatementTimeout,
    /// Anything else (constraint violations, bad input, ...)
    Other,
}

/// Legacy backend codes that identify transient failures
const AUTH_EXPIRED_CODE: &str = "PGRST301";
const STATEMENT_TIMEOUT_CODE: &str = "57014";

impl ErrorKind {
    /// Classify an error from its backend code and message.
    ///
    /// This is the only place where string signatures are inspected.
    pub fn classify(code: Option<&str>, message: &str) -> Self {
        match code {
            Some(AUTH_EXPIRED_CODE) => return ErrorKind::AuthExpired,
            Some(STATEMENT_TIMEOUT_CODE) => return ErrorKind::StatementTimeout,
            Some("ECONNREFUSED") => return ErrorKind::ConnectionRefused,
            Some("ETIMEDOUT") => return ErrorKind::Timeout,
            Some("ENOTFOUND") => return ErrorKind::DnsFailure,
            _ => {}
        }

        let message = message.to_ascii_lowercase();
        if message.contains("jwt expired") {
            ErrorKind::AuthExpired
        } else if message.contains("statement timeout") || message.contains("canceling statement") {
            ErrorKind::StatementTimeout
        } else if message.contains("econnrefused") || message.contains("connection refused") {
            ErrorKind::ConnectionRefused
        } else if message.contains("enotfound")
            || message.contains("dns")
            || message.contains("failed to lookup address")
        {
            ErrorKind::DnsFailure
        } else if message.contains("etimedout")
            || message.contains("timed out")
            || message.contains("timeout")
        {
            ErrorKind::Timeout
        } else if message.contains("network error") || message.contains("failed to fetch") {
            ErrorKind::NetworkError
        } else {
            ErrorKind::Other
        }
    }

    /// All kinds considered transient by default
    pub fn transient() -> HashSet<ErrorKind> {
        [
            ErrorKind::AuthExpired,
            ErrorKind::ConnectionRefused,
            ErrorKind::Timeout,
            ErrorKind::DnsFailure,
            ErrorKind::NetworkError,
            ErrorKind::StatementTimeout,
        ]
        .into_iter()
        .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DnsFailure => "dns_failure",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::StatementTimeout => "statement_timeout",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed backend operation, tagged with its kind
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct QueryError {
    pub kind: ErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Build an error from a raw backend code and message, classifying it
    pub fn from_parts(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify(code, &message),
            code: code.map(str::to_string),
            message,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => QueryError::new(ErrorKind::Timeout, err.to_string()),
            sqlx::Error::PoolClosed => QueryError::new(ErrorKind::NetworkError, err.to_string()),
            sqlx::Error::Io(io) => {
                let kind = match io.kind() {
                    std::io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
                    std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
                    _ => match ErrorKind::classify(None, &io.to_string()) {
                        ErrorKind::Other => ErrorKind::NetworkError,
                        kind => kind,
                    },
                };
                QueryError::new(kind, err.to_string())
            }
            sqlx::Error::Tls(_) => QueryError::new(ErrorKind::NetworkError, err.to_string()),
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.to_string());
                QueryError::from_parts(code.as_deref(), db.message())
            }
            _ => QueryError::from_parts(None, err.to_string()),
        }
    }
}

/// Errors surfaced by the resilient query layer
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The circuit breaker short-circuited the call; try again later
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// The operation did not finish before its deadline
    #[error("Query timeout after {}ms", .0.as_millis())]
    QueryTimeout(Duration),

    /// A retryable error persisted through every attempt
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: QueryError,
    },

    /// The operation failed with a non-retryable error
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A deferred operation was dropped before it could run
    #[error("Deferred operation was dropped before it ran")]
    Cancelled,
}

impl ResilienceError {
    /// Kind of the underlying query error, if any
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ResilienceError::Query(e) => Some(e.kind),
            ResilienceError::RetriesExhausted { last, .. } => Some(last.kind),
            _ => None,
        }
    }

    /// Whether the caller should treat this as "try again later"
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, ResilienceError::Query(_))
    }
}
