//! Error types for the resilience primitives

use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by a guarded operation
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in resilience operations
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Circuit breaker is open; the operation was not executed
    #[error("circuit breaker '{name}' is open, rejecting requests")]
    CircuitOpen { name: String },

    /// Token bucket had no token available
    #[error("rate limit exceeded for '{name}'")]
    RateLimitExceeded { name: String },

    /// No concurrency slot was acquired within the timeout
    #[error("bulkhead '{name}' has no free slot after waiting {timeout:?}")]
    BulkheadTimeout { name: String, timeout: Duration },

    /// Every attempt failed; wraps the error of the last attempt
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<ResilienceError>,
    },

    /// Cancellation signal fired before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// Transient error that may be retried
    #[error("transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Operation failure labelled with a caller-defined error code
    #[error("{code}: {source}")]
    Coded {
        code: String,
        #[source]
        source: BoxError,
    },

    /// Any other operation failure
    #[error(transparent)]
    Operation(BoxError),

    /// A primitive was configured with out-of-range values
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    /// Wrap an arbitrary operation error
    pub fn operation(err: impl Into<BoxError>) -> Self {
        ResilienceError::Operation(err.into())
    }

    /// Wrap an operation error under an explicit error code
    pub fn coded(code: impl Into<String>, err: impl Into<BoxError>) -> Self {
        ResilienceError::Coded {
            code: code.into(),
            source: err.into(),
        }
    }

    /// Rejected by admission control without running the operation
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitOpen { .. }
                | ResilienceError::RateLimitExceeded { .. }
                | ResilienceError::BulkheadTimeout { .. }
        )
    }

    /// Default retry predicate: retry operation failures, never retry
    /// rejections, cancellation, permanent errors or configuration errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_)
                | ResilienceError::Operation(_)
                | ResilienceError::Coded { .. }
        )
    }

    /// Check if this error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResilienceError::Permanent(_) | ResilienceError::InvalidConfig(_)
        )
    }

    /// Check if this error should contribute to circuit breaker failure count
    pub fn should_trip_breaker(&self) -> bool {
        !self.is_rejection() && !matches!(self, ResilienceError::Cancelled)
    }

    /// Stable code used to label failed requests in SLI metrics
    pub fn error_code(&self) -> &str {
        match self {
            ResilienceError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            ResilienceError::RateLimitExceeded { .. } => "RATE_LIMITED",
            ResilienceError::BulkheadTimeout { .. } => "BULKHEAD_TIMEOUT",
            ResilienceError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            ResilienceError::Cancelled => "CANCELLED",
            ResilienceError::Transient(_) => "TRANSIENT",
            ResilienceError::Permanent(_) => "PERMANENT",
            ResilienceError::Coded { code, .. } => code,
            ResilienceError::Operation(_) => "OPERATION_FAILED",
            ResilienceError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    /// Innermost error: unwraps `RetryExhausted` down to the last attempt's error
    pub fn root(&self) -> &ResilienceError {
        match self {
            ResilienceError::RetryExhausted { source, .. } => source.root(),
            other => other,
        }
    }
}
