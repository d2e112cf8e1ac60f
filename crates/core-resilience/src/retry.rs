//! Retry with exponential backoff
//!
//! Delay after failed attempt `n` (1-based) is
//! `min(initial_delay * multiplier^(n-1), max_delay)`, then, with jitter
//! enabled, scaled by a random factor in `[1.0, 1.3)`. Jitter is applied after
//! the cap, so a jittered delay may exceed `max_delay` by up to 30%.

use crate::error::ResilienceError;
use bulwark_observability::{names, SharedSink};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound of the jitter factor added on top of the base delay
const JITTER_FACTOR: f64 = 0.3;

/// Decides whether an error is worth another attempt
pub type RetryPredicate = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// Retry policy: attempts, backoff shape and the retryable-error predicate
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retryable: Arc::new(ResilienceError::is_retryable),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Fast retry for quick operations
    pub fn fast() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Patient retry for network calls
    pub fn network() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Slow retry for expensive operations
    pub fn slow() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            multiplier: 3.0,
            jitter: false,
            ..Default::default()
        }
    }

    /// Replace the retryable-error predicate
    pub fn with_retryable<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, err: &ResilienceError) -> bool {
        (self.retryable)(err)
    }

    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::InvalidConfig(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "retry multiplier must be greater than 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(ResilienceError::InvalidConfig(format!(
                "retry initial_delay {:?} exceeds max_delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Capped exponential delay after failed attempt `attempt`, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_nanos() as f64;
        Duration::from_nanos(nanos.min(cap).round() as u64)
    }

    /// Delay to sleep after failed attempt `attempt`, jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter {
            let factor = 1.0 + rand::rng().random_range(0.0..JITTER_FACTOR);
            Duration::from_nanos((base.as_nanos() as f64 * factor).round() as u64)
        } else {
            base
        }
    }
}

/// Label value for the attempt number; attempts past the third share a bucket
fn attempt_label(attempt: u32) -> &'static str {
    match attempt {
        1 => "1",
        2 => "2",
        3 => "3",
        _ => "4+",
    }
}

/// Runs operations under a [`RetryPolicy`], emitting retry metrics
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    name: String,
    policy: RetryPolicy,
    sink: SharedSink,
}

impl RetryExecutor {
    pub fn new(
        name: impl Into<String>,
        policy: RetryPolicy,
        sink: SharedSink,
    ) -> Result<Self, ResilienceError> {
        policy.validate()?;
        Ok(Self {
            name: name.into(),
            policy,
            sink,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out
    ///
    /// Exhaustion yields [`ResilienceError::RetryExhausted`] wrapping the last
    /// error. A non-retryable error is returned unchanged. Cancelling `cancel`
    /// aborts the running attempt or the backoff sleep with
    /// [`ResilienceError::Cancelled`].
    pub async fn run<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(self.cancelled(attempt));
            }

            let label = attempt_label(attempt);
            self.sink.inc(
                names::RETRY_ATTEMPTS_TOTAL,
                &[("name", &self.name), ("attempt", label)],
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(attempt)),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => {
                    self.sink.inc(
                        names::RETRY_SUCCESS_TOTAL,
                        &[("name", &self.name), ("attempt", label)],
                    );
                    if attempt > 1 {
                        debug!(retry = %self.name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(ResilienceError::Cancelled) => return Err(self.cancelled(attempt)),
                Err(err) => err,
            };

            if !self.policy.is_retryable(&err) {
                self.fail("non_retryable");
                debug!(retry = %self.name, attempt, error = %err, "Error is not retryable");
                return Err(err);
            }

            if attempt >= max_attempts {
                self.fail("exhausted");
                warn!(
                    retry = %self.name,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(ResilienceError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.policy.delay_for(attempt);
            self.sink.observe_histogram(
                names::RETRY_DELAY_SECONDS,
                &[("name", &self.name)],
                delay.as_secs_f64(),
            );
            debug!(
                retry = %self.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run without a cancellation signal
    pub async fn run_uncancellable<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.run(&CancellationToken::new(), op).await
    }

    fn fail(&self, reason: &'static str) {
        self.sink.inc(
            names::RETRY_FAILURE_TOTAL,
            &[("name", &self.name), ("reason", reason)],
        );
    }

    fn cancelled(&self, attempt: u32) -> ResilienceError {
        self.fail("cancelled");
        debug!(retry = %self.name, attempt, "Retry cancelled");
        ResilienceError::Cancelled
    }
}
