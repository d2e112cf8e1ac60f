//! Composed protection around one external dependency
//!
//! Every call passes the configured stages in a fixed order:
//!
//! ```text
//! call(operation, op)
//!   │
//!   ▼
//! Rate Limiter      ← rejects with RateLimitExceeded (or waits, in call_waiting)
//!   │
//!   ▼
//! Bulkhead          ← rejects with BulkheadTimeout when no slot frees up
//!   │
//!   ▼
//! Circuit Breaker   ← rejects with CircuitOpen; sees the retry loop as one call
//!   │
//!   ▼
//! Retry             ← backs off between attempts of op
//!   │
//!   ▼
//! op()
//! ```
//!
//! Stages left out of the dependency's configuration are skipped. Whatever
//! happens, the call is recorded as exactly one [`RequestOutcome`] on the
//! shared [`SliTracker`].

use bulwark_core_resilience::{
    Admission, Bulkhead, CircuitBreaker, RateLimiter, ResilienceError, RetryExecutor,
};
use bulwark_core_sli::{RequestOutcome, SliTracker};
use bulwark_observability::SharedSink;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::ErrorCatalog;
use crate::config::{BulwarkConfig, DependencyConfig};
use crate::error::{BulwarkError, Result};

/// Rate limiter → bulkhead → circuit breaker → retry → operation
#[derive(Debug, Clone)]
pub struct DependencyGuard {
    name: String,
    limiter: Option<Arc<dyn Admission>>,
    bulkhead: Option<Bulkhead>,
    breaker: Option<CircuitBreaker>,
    retry: Option<RetryExecutor>,
    tracker: Arc<SliTracker>,
    catalog: Arc<ErrorCatalog>,
}

impl DependencyGuard {
    /// Guard with no stages; add them with the `with_*` methods
    pub fn new(
        name: impl Into<String>,
        tracker: Arc<SliTracker>,
        catalog: Arc<ErrorCatalog>,
    ) -> Self {
        Self {
            name: name.into(),
            limiter: None,
            bulkhead: None,
            breaker: None,
            retry: None,
            tracker,
            catalog,
        }
    }

    /// Build every stage the dependency's configuration enables
    pub fn from_config(
        config: &DependencyConfig,
        tracker: Arc<SliTracker>,
        catalog: Arc<ErrorCatalog>,
        sink: SharedSink,
    ) -> std::result::Result<Self, ResilienceError> {
        let mut guard = Self::new(config.name.clone(), tracker, catalog);
        if let Some(limiter) = config.rate_limiter_config() {
            guard = guard.with_rate_limiter(RateLimiter::new(limiter, sink.clone())?);
        }
        if let Some(bulkhead) = config.bulkhead_config() {
            guard = guard.with_bulkhead(Bulkhead::new(bulkhead, sink.clone())?);
        }
        if let Some(breaker) = config.breaker_config() {
            guard = guard.with_breaker(CircuitBreaker::new(breaker, sink.clone())?);
        }
        if let Some(policy) = config.retry_policy() {
            guard = guard.with_retry(RetryExecutor::new(config.name.clone(), policy, sink)?);
        }
        Ok(guard)
    }

    pub fn with_rate_limiter(mut self, limiter: impl Admission + 'static) -> Self {
        self.limiter = Some(Arc::new(limiter));
        self
    }

    pub fn with_bulkhead(mut self, bulkhead: Bulkhead) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    pub fn bulkhead(&self) -> Option<&Bulkhead> {
        self.bulkhead.as_ref()
    }

    pub fn retry(&self) -> Option<&RetryExecutor> {
        self.retry.as_ref()
    }

    pub fn has_rate_limiter(&self) -> bool {
        self.limiter.is_some()
    }

    pub fn tracker(&self) -> &Arc<SliTracker> {
        &self.tracker
    }

    /// Run `op` through every stage; an empty rate limiter rejects immediately
    ///
    /// `op` is invoked once per retry attempt and not at all when a stage
    /// rejects the call.
    pub async fn call<F, Fut, T>(
        &self,
        operation: &str,
        op: F,
    ) -> std::result::Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ResilienceError>>,
    {
        self.run(operation, &CancellationToken::new(), false, op)
            .await
    }

    /// Like [`call`](Self::call), but waits for a rate limit token
    ///
    /// `cancel` also aborts the bulkhead wait, the running attempt and the
    /// retry backoff; the call then fails with [`ResilienceError::Cancelled`].
    pub async fn call_waiting<F, Fut, T>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        op: F,
    ) -> std::result::Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ResilienceError>>,
    {
        self.run(operation, cancel, true, op).await
    }

    async fn run<F, Fut, T>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        wait_for_token: bool,
        op: F,
    ) -> std::result::Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ResilienceError>>,
    {
        let operation = if operation.is_empty() {
            self.name.as_str()
        } else {
            operation
        };
        let started = Instant::now();
        let result = self.admit(cancel, wait_for_token, op).await;
        self.record(operation, started.elapsed(), &result);
        result
    }

    async fn admit<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        wait_for_token: bool,
        op: F,
    ) -> std::result::Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ResilienceError>>,
    {
        if let Some(limiter) = &self.limiter {
            let admitted = if wait_for_token {
                limiter.wait_acquire(cancel).await
            } else {
                limiter.try_acquire()
            };
            if !admitted {
                return Err(if cancel.is_cancelled() {
                    ResilienceError::Cancelled
                } else {
                    ResilienceError::RateLimitExceeded {
                        name: self.name.clone(),
                    }
                });
            }
        }

        match &self.bulkhead {
            Some(bulkhead) => {
                let timeout = bulkhead.config().acquire_timeout;
                bulkhead
                    .execute_with_cancel(cancel, timeout, || self.protect(cancel, op))
                    .await
            }
            None => self.protect(cancel, op).await,
        }
    }

    async fn protect<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> std::result::Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ResilienceError>>,
    {
        match &self.breaker {
            Some(breaker) => breaker.execute(|| self.attempt(cancel, op)).await,
            None => self.attempt(cancel, op).await,
        }
    }

    async fn attempt<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> std::result::Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ResilienceError>>,
    {
        match &self.retry {
            Some(retry) => retry.run(cancel, op).await,
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ResilienceError::Cancelled),
                    result = op() => result,
                }
            }
        }
    }

    fn record<T>(
        &self,
        operation: &str,
        latency: Duration,
        result: &std::result::Result<T, ResilienceError>,
    ) {
        let outcome = match result {
            Ok(_) => RequestOutcome::success(operation, latency),
            Err(err) => {
                let (code, severity) = self.catalog.classify(err);
                if err.is_rejection() {
                    warn!(
                        dependency = %self.name,
                        operation,
                        code = %code,
                        "Call rejected"
                    );
                } else {
                    debug!(
                        dependency = %self.name,
                        operation,
                        code = %code,
                        severity = %severity,
                        error = %err,
                        "Call failed"
                    );
                }
                RequestOutcome::failure(operation, latency, code, severity)
            }
        };
        self.tracker.record_request(&outcome);
    }
}

/// Guards looked up by dependency name
///
/// All guards share one [`SliTracker`] and one [`ErrorCatalog`].
#[derive(Debug, Clone)]
pub struct GuardRegistry {
    guards: HashMap<String, DependencyGuard>,
    tracker: Arc<SliTracker>,
    catalog: Arc<ErrorCatalog>,
}

impl GuardRegistry {
    pub fn new(tracker: Arc<SliTracker>, catalog: Arc<ErrorCatalog>) -> Self {
        Self {
            guards: HashMap::new(),
            tracker,
            catalog,
        }
    }

    /// One guard per `[[dependencies]]` entry, tracked under `service_name`
    pub fn from_config(
        config: &BulwarkConfig,
        catalog: ErrorCatalog,
        sink: SharedSink,
    ) -> Result<Self> {
        config.validate()?;

        let tracker = Arc::new(SliTracker::new(config.service_name.clone(), sink.clone()));
        let mut registry = Self::new(tracker, Arc::new(catalog));
        for dependency in &config.dependencies {
            let guard = DependencyGuard::from_config(
                dependency,
                registry.tracker.clone(),
                registry.catalog.clone(),
                sink.clone(),
            )?;
            registry.register(guard);
        }

        debug!(
            service = %config.service_name,
            guards = registry.len(),
            "Guard registry built"
        );
        Ok(registry)
    }

    /// Guard sharing this registry's tracker and catalog
    pub fn guard_for(&self, name: impl Into<String>) -> DependencyGuard {
        DependencyGuard::new(name, self.tracker.clone(), self.catalog.clone())
    }

    /// Add a guard, returning the one it replaced
    pub fn register(&mut self, guard: DependencyGuard) -> Option<DependencyGuard> {
        self.guards.insert(guard.name().to_string(), guard)
    }

    pub fn get(&self, name: &str) -> Option<&DependencyGuard> {
        self.guards.get(name)
    }

    /// Like [`get`](Self::get), failing with [`BulwarkError::UnknownDependency`]
    pub fn guard(&self, name: &str) -> Result<&DependencyGuard> {
        self.get(name)
            .ok_or_else(|| BulwarkError::UnknownDependency(name.to_string()))
    }

    /// Registered dependency names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.guards.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn tracker(&self) -> &Arc<SliTracker> {
        &self.tracker
    }

    pub fn catalog(&self) -> &ErrorCatalog {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core_resilience::{CircuitBreakerConfig, CircuitState, RetryPolicy};
    use bulwark_core_sli::ErrorSeverity;
    use bulwark_observability::names;
    use bulwark_observability::testing::RecordingSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn bare_guard() -> DependencyGuard {
        DependencyGuard::new(
            "db",
            Arc::new(SliTracker::new("svc", bulwark_observability::noop())),
            Arc::new(ErrorCatalog::with_builtin()),
        )
    }

    #[tokio::test]
    async fn test_bare_guard_records_success() {
        let guard = bare_guard();

        let value = guard.call("select", || async { Ok(7) }).await.unwrap();

        assert_eq!(value, 7);
        let snapshot = guard.tracker().metrics();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.success_requests, 1);
        assert_eq!(guard.tracker().operations(), vec!["select"]);
    }

    #[tokio::test]
    async fn test_empty_operation_uses_dependency_name() {
        let guard = bare_guard();
        guard.call("", || async { Ok(()) }).await.unwrap();
        assert_eq!(guard.tracker().operations(), vec!["db"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_inside_breaker_counts_once() {
        let sink = Arc::new(RecordingSink::new());
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..CircuitBreakerConfig::named("db")
            },
            sink.clone(),
        )
        .unwrap();
        let mut policy = RetryPolicy::default();
        policy.jitter = false;
        let guard = bare_guard()
            .with_breaker(breaker)
            .with_retry(RetryExecutor::new("db", policy, sink.clone()).unwrap());

        let calls = AtomicU32::new(0);
        let err = guard
            .call("select", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ResilienceError::Transient("timeout".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.counter(names::RETRY_ATTEMPTS_TOTAL, &[("name", "db")]), 3);
        let breaker = guard.breaker().unwrap();
        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);

        let failures = guard.tracker().metrics().failures;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_code, "TRANSIENT");
        assert_eq!(failures[0].count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_call_is_recorded() {
        let guard = bare_guard();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = guard
            .call_waiting("select", &cancel, || async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Cancelled));
        let failures = guard.tracker().metrics().failures;
        assert_eq!(failures[0].error_code, "CANCELLED");
        assert_eq!(failures[0].severity, ErrorSeverity::Info);
    }

    #[test]
    fn test_registry_lookup() {
        let tracker = Arc::new(SliTracker::new("svc", bulwark_observability::noop()));
        let mut registry = GuardRegistry::new(tracker, Arc::new(ErrorCatalog::new()));
        assert!(registry.is_empty());

        let guard = registry.guard_for("cache");
        assert!(registry.register(guard).is_none());
        let replacement = registry.guard_for("cache");
        assert!(registry.register(replacement).is_some());
        assert_eq!(registry.len(), 1);

        assert!(registry.get("cache").is_some());
        assert!(matches!(
            registry.guard("queue"),
            Err(BulwarkError::UnknownDependency(name)) if name == "queue"
        ));
    }
}
