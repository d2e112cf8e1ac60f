//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a
//! dependency is experiencing issues. It has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Dependency is unhealthy, requests fail immediately
//! - HalfOpen: A bounded number of trial requests probe for recovery
//!
//! Every state read, check and transition happens under one lock, and every
//! transition bumps a generation counter. Outcomes of calls admitted under an
//! older generation are counted in metrics but never move the state machine.

use crate::error::ResilienceError;
use bulwark_observability::{names, SharedSink};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is half-open, trial requests test dependency recovery
    HalfOpen,
    /// Circuit is open, requests fail immediately
    Open,
}

impl CircuitState {
    /// Label value used in metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }

    /// Value exported on the state gauge
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Breaker name, used as the metrics label
    pub name: String,
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before admitting trial requests
    pub open_duration: Duration,
    /// Successful trials required to close; also the cap on concurrent trials
    pub half_open_trial_count: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            half_open_trial_count: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Config with default thresholds under the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.name.is_empty() {
            return Err(ResilienceError::InvalidConfig(
                "circuit breaker name must not be empty".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "circuit breaker '{}': failure_threshold must be at least 1",
                self.name
            )));
        }
        if self.half_open_trial_count == 0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "circuit breaker '{}': half_open_trial_count must be at least 1",
                self.name
            )));
        }
        if self.open_duration.is_zero() {
            return Err(ResilienceError::InvalidConfig(format!(
                "circuit breaker '{}': open_duration must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    /// Successful trials since entering half-open
    half_open_successes: u32,
    /// Trials admitted in half-open that have not reported yet
    half_open_in_flight: u32,
    last_failure: Option<Instant>,
    generation: u64,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            last_failure: None,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// Error that does not count against the dependency
    Ignored,
}

/// Circuit breaker for protecting against cascading failures
///
/// Clones share state.
///
/// # Example
/// ```no_run
/// use bulwark_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     let breaker = CircuitBreaker::new(
///         CircuitBreakerConfig::named("payments"),
///         bulwark_observability::noop(),
///     )?;
///
///     let result = breaker
///         .execute(|| async { Ok::<_, ResilienceError>(42) })
///         .await?;
///
///     println!("Result: {}", result);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
    sink: SharedSink,
}

impl CircuitBreaker {
    /// Create a new circuit breaker, validating the configuration
    pub fn new(config: CircuitBreakerConfig, sink: SharedSink) -> Result<Self, ResilienceError> {
        config.validate()?;
        sink.set_gauge(
            names::BREAKER_STATE,
            &[("name", &config.name)],
            CircuitState::Closed.gauge_value(),
        );
        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
            sink,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An expired open period is reported as `Open` until the
    /// next call moves the breaker to half-open.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Force the breaker back to `Closed` with cleared counters
    ///
    /// Calls still in flight from before the reset no longer affect state.
    pub fn reset(&self) {
        let mut state = self.lock();
        self.transition(&mut state, CircuitState::Closed);
        state.consecutive_failures = 0;
        state.half_open_successes = 0;
        state.half_open_in_flight = 0;
        state.last_failure = None;
        state.generation += 1;
        self.sink.set_gauge(
            names::BREAKER_STATE,
            &[("name", &self.config.name)],
            CircuitState::Closed.gauge_value(),
        );
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Returns [`ResilienceError::CircuitOpen`] without invoking `op` when the
    /// breaker rejects the call. Errors for which
    /// [`ResilienceError::should_trip_breaker`] is false (nested rejections,
    /// cancellation) are passed through without counting as failures.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let mut ticket = self.admit()?;

        let result = op().await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) if e.should_trip_breaker() => Outcome::Failure,
            Err(_) => Outcome::Ignored,
        };
        ticket.settle(outcome);

        result
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        // State stays consistent across a panic: every mutation is a plain
        // field assignment completed before any call that could unwind.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check circuit state, moving Open to HalfOpen once the open period has
    /// elapsed, and reserve a trial slot when half-open.
    fn admit(&self) -> Result<Ticket<'_>, ResilienceError> {
        let mut state = self.lock();

        if state.state == CircuitState::Open {
            let expired = state
                .last_failure
                .map_or(true, |at| at.elapsed() > self.config.open_duration);
            if expired {
                self.transition(&mut state, CircuitState::HalfOpen);
            }
        }

        match state.state {
            CircuitState::Closed => Ok(Ticket::new(self, CircuitState::Closed, state.generation)),
            CircuitState::HalfOpen
                if state.half_open_successes + state.half_open_in_flight
                    < self.config.half_open_trial_count =>
            {
                state.half_open_in_flight += 1;
                Ok(Ticket::new(self, CircuitState::HalfOpen, state.generation))
            }
            rejected_in => {
                drop(state);
                self.sink.inc(
                    names::BREAKER_REQUESTS_TOTAL,
                    &[
                        ("name", &self.config.name),
                        ("state", rejected_in.as_str()),
                        ("result", "rejected"),
                    ],
                );
                debug!(
                    breaker = %self.config.name,
                    state = %rejected_in,
                    "Circuit breaker rejected request"
                );
                Err(ResilienceError::CircuitOpen {
                    name: self.config.name.clone(),
                })
            }
        }
    }

    /// Apply the outcome of an admitted call
    fn record(&self, admitted_in: CircuitState, generation: u64, outcome: Outcome) {
        let result = match outcome {
            Outcome::Success => "success",
            Outcome::Failure | Outcome::Ignored => "error",
        };
        self.sink.inc(
            names::BREAKER_REQUESTS_TOTAL,
            &[
                ("name", &self.config.name),
                ("state", admitted_in.as_str()),
                ("result", result),
            ],
        );
        if outcome == Outcome::Failure {
            self.sink
                .inc(names::BREAKER_ERRORS_TOTAL, &[("name", &self.config.name)]);
        }

        let mut state = self.lock();
        if state.generation != generation {
            debug!(
                breaker = %self.config.name,
                "Ignoring outcome of call admitted before the last transition"
            );
            return;
        }
        if admitted_in == CircuitState::HalfOpen {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }

        match (state.state, outcome) {
            (_, Outcome::Ignored) => {}
            (CircuitState::Closed, Outcome::Success) => {
                state.consecutive_failures = 0;
            }
            (CircuitState::Closed, Outcome::Failure) => {
                state.consecutive_failures += 1;
                state.last_failure = Some(Instant::now());
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.config.name,
                        failures = state.consecutive_failures,
                        "Failure threshold reached, opening circuit"
                    );
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.half_open_trial_count {
                    self.transition(&mut state, CircuitState::Closed);
                }
            }
            (CircuitState::HalfOpen, Outcome::Failure) => {
                state.consecutive_failures += 1;
                state.last_failure = Some(Instant::now());
                warn!(breaker = %self.config.name, "Trial request failed, reopening circuit");
                self.transition(&mut state, CircuitState::Open);
            }
            // Transitions to Open always bump the generation, so no call
            // admitted in the current generation can report while Open.
            (CircuitState::Open, _) => {}
        }
    }

    /// Release a half-open trial slot whose call never reported
    fn abandon(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, state: &mut CircuitBreakerState, to: CircuitState) {
        let from = state.state;
        if from == to {
            return;
        }

        state.state = to;
        state.generation += 1;
        state.half_open_successes = 0;
        state.half_open_in_flight = 0;
        if to == CircuitState::Closed {
            state.consecutive_failures = 0;
        }

        self.sink.set_gauge(
            names::BREAKER_STATE,
            &[("name", &self.config.name)],
            to.gauge_value(),
        );
        self.sink.inc(
            names::BREAKER_STATE_CHANGES_TOTAL,
            &[
                ("name", &self.config.name),
                ("from", from.as_str()),
                ("to", to.as_str()),
            ],
        );
        info!(
            breaker = %self.config.name,
            from = %from,
            to = %to,
            "Circuit breaker state changed"
        );
    }
}

/// Admission handed out by [`CircuitBreaker::admit`]
///
/// Dropping an unsettled ticket (the caller's future was cancelled) frees its
/// half-open trial slot without recording an outcome.
struct Ticket<'a> {
    breaker: &'a CircuitBreaker,
    admitted_in: CircuitState,
    generation: u64,
    settled: bool,
}

impl<'a> Ticket<'a> {
    fn new(breaker: &'a CircuitBreaker, admitted_in: CircuitState, generation: u64) -> Self {
        Self {
            breaker,
            admitted_in,
            generation,
            settled: false,
        }
    }

    fn settle(&mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker
            .record(self.admitted_in, self.generation, outcome);
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admitted_in == CircuitState::HalfOpen {
            self.breaker.abandon(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_observability::RecordingSink;
    use tokio::sync::oneshot;

    fn breaker_with(config: CircuitBreakerConfig) -> (CircuitBreaker, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let breaker = CircuitBreaker::new(config, sink.clone()).unwrap();
        (breaker, sink)
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), ResilienceError> {
        breaker
            .execute(|| async { Err(ResilienceError::Transient("test error".to_string())) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), ResilienceError> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_to_open() {
        let (breaker, sink) = breaker_with(CircuitBreakerConfig {
            name: "db".to_string(),
            failure_threshold: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 3);

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .execute(|| async {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { ref name }) if name == "db"));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));

        assert_eq!(sink.gauge(names::BREAKER_STATE, &[("name", "db")]), Some(2.0));
        assert_eq!(
            sink.counter(names::BREAKER_ERRORS_TOTAL, &[("name", "db")]),
            3
        );
        assert_eq!(
            sink.counter(
                names::BREAKER_REQUESTS_TOTAL,
                &[("state", "open"), ("result", "rejected")]
            ),
            1
        );
        assert_eq!(
            sink.counter(
                names::BREAKER_STATE_CHANGES_TOTAL,
                &[("from", "closed"), ("to", "open")]
            ),
            1
        );
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let (breaker, _) = breaker_with(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_half_open_to_closed() {
        let (breaker, _) = breaker_with(CircuitBreakerConfig {
            failure_threshold: 2,
            half_open_trial_count: 2,
            open_duration: Duration::from_millis(50),
            ..Default::default()
        });

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Still rejecting exactly at the boundary
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(matches!(
            succeed(&breaker).await,
            Err(ResilienceError::CircuitOpen { .. })
        ));

        tokio::time::advance(Duration::from_millis(10)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let (breaker, sink) = breaker_with(CircuitBreakerConfig {
            name: "cache".to_string(),
            failure_threshold: 1,
            open_duration: Duration::from_secs(1),
            ..Default::default()
        });

        fail(&breaker).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(1001)).await;
        fail(&breaker).await.unwrap_err();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            succeed(&breaker).await,
            Err(ResilienceError::CircuitOpen { .. })
        ));
        assert_eq!(
            sink.counter(
                names::BREAKER_STATE_CHANGES_TOTAL,
                &[("from", "half_open"), ("to", "open")]
            ),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_caps_concurrent_trials() {
        let (breaker, _) = breaker_with(CircuitBreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_millis(10),
            half_open_trial_count: 1,
            ..Default::default()
        });

        fail(&breaker).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(11)).await;

        let (release, hold) = oneshot::channel::<()>();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        let _ = hold.await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // The single trial slot is taken
        assert!(matches!(
            succeed(&breaker).await,
            Err(ResilienceError::CircuitOpen { .. })
        ));

        release.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_frees_slot() {
        let (breaker, _) = breaker_with(CircuitBreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_millis(10),
            half_open_trial_count: 1,
            ..Default::default()
        });

        fail(&breaker).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(11)).await;

        let stalled = tokio::time::timeout(
            Duration::from_millis(5),
            breaker.execute(|| std::future::pending::<Result<(), ResilienceError>>()),
        )
        .await;
        assert!(stalled.is_err());

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcome_is_ignored() {
        let (breaker, _) = breaker_with(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        let (release, hold) = oneshot::channel::<()>();
        let slow = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        let _ = hold.await;
                        Err::<(), _>(ResilienceError::Transient("late".to_string()))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        breaker.reset();
        release.send(()).unwrap();
        slow.await.unwrap().unwrap_err();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_rejections_do_not_count_as_failures() {
        let (breaker, _) = breaker_with(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        let result: Result<(), _> = breaker
            .execute(|| async {
                Err(ResilienceError::RateLimitExceeded {
                    name: "inner".to_string(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_reset() {
        let (breaker, sink) = breaker_with(CircuitBreakerConfig {
            name: "api".to_string(),
            failure_threshold: 1,
            ..Default::default()
        });

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(sink.gauge(names::BREAKER_STATE, &[("name", "api")]), Some(0.0));
        assert_eq!(
            sink.counter(
                names::BREAKER_STATE_CHANGES_TOTAL,
                &[("from", "open"), ("to", "closed")]
            ),
            1
        );
        succeed(&breaker).await.unwrap();
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());

        let zero_threshold = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_threshold.validate(),
            Err(ResilienceError::InvalidConfig(_))
        ));

        let zero_trials = CircuitBreakerConfig {
            half_open_trial_count: 0,
            ..Default::default()
        };
        assert!(CircuitBreaker::new(zero_trials, bulwark_observability::noop()).is_err());
    }
}
