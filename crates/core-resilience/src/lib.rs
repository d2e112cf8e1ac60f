//! Bulwark Core Resilience: Pure-logic failure isolation primitives
//!
//! # Overview
//!
//! This crate provides the building blocks Bulwark composes around every call
//! to an external dependency:
//!
//! - **Circuit Breaker**: Fails fast while a dependency is unhealthy, probes recovery with bounded trials
//! - **Retry**: Exponential backoff with optional jitter and a pluggable retryable-error predicate
//! - **Rate Limiter**: Continuously refilling token bucket
//! - **Bulkhead**: Bounded concurrency with timed, cancellable slot acquisition
//!
//! Every primitive takes a [`SharedSink`](bulwark_observability::SharedSink) at
//! construction and emits its own metrics through it.
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - The protected dependency (database, HTTP API, queue)
//! - How metrics are exported
//! - Configuration files
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Rate Limiter                      │  ← Admission control
//! │  (Token bucket, rejects when empty)     │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Bulkhead                          │  ← Concurrency cap
//! │  (Semaphore, timed acquisition)         │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Tracks failures, opens on threshold)  │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry                             │  ← Transient failure recovery
//! │  (Exponential backoff, jitter)          │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!        External Dependency
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use bulwark_core_resilience::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let sink = bulwark_observability::noop();
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig {
//!         name: "inventory".to_string(),
//!         failure_threshold: 5,
//!         open_duration: Duration::from_secs(30),
//!         half_open_trial_count: 2,
//!     },
//!     sink.clone(),
//! )?;
//! let retry = RetryExecutor::new("inventory", RetryPolicy::network(), sink)?;
//!
//! let stock = breaker
//!     .execute(|| retry.run_uncancellable(|| async { Ok::<_, ResilienceError>(42) }))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod bulkhead;
pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;
pub mod retry;

// Re-export main types for convenience
pub use bulkhead::{Bulkhead, BulkheadConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{BoxError, ResilienceError};
pub use rate_limiter::{Admission, RateLimiter, RateLimiterConfig};
pub use retry::{RetryExecutor, RetryPolicy, RetryPredicate};

#[cfg(feature = "governor-impl")]
pub use rate_limiter::governor_impl::GovernorRateLimiter;

pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bulkhead::{Bulkhead, BulkheadConfig};
    pub use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use crate::error::ResilienceError;
    pub use crate::rate_limiter::{Admission, RateLimiter, RateLimiterConfig};
    pub use crate::retry::{RetryExecutor, RetryPolicy};
    pub use tokio_util::sync::CancellationToken;
}
