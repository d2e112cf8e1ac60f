//! Bulkhead: bounded concurrency per dependency
//!
//! At most `max_concurrency` operations run at once. Callers wait up to a
//! timeout for a slot; the slot is released when the operation finishes,
//! fails, panics or is dropped.

use crate::error::ResilienceError;
use bulwark_observability::{names, SharedSink};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Configuration for a bulkhead
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Bulkhead name, used as the metrics label
    pub name: String,
    pub max_concurrency: usize,
    /// Default wait for a slot in [`Bulkhead::execute`]
    pub acquire_timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_concurrency: 10,
            acquire_timeout: Duration::from_secs(1),
        }
    }
}

impl BulkheadConfig {
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_concurrency == 0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "bulkhead '{}': max_concurrency must be at least 1",
                self.name
            )));
        }
        if self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(ResilienceError::InvalidConfig(format!(
                "bulkhead '{}': max_concurrency exceeds {}",
                self.name,
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}

/// Concurrency limiter
///
/// Clones share the same slots.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    config: Arc<BulkheadConfig>,
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    sink: SharedSink,
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig, sink: SharedSink) -> Result<Self, ResilienceError> {
        config.validate()?;
        sink.set_gauge(
            names::BULKHEAD_ACTIVE_REQUESTS,
            &[("name", &config.name)],
            0.0,
        );
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            config: Arc::new(config),
            active: Arc::new(AtomicUsize::new(0)),
            sink,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Operations currently holding a slot
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `op` in a slot, waiting up to the configured acquire timeout
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.execute_with_timeout(self.config.acquire_timeout, op)
            .await
    }

    /// Run `op` in a slot, waiting up to `timeout`
    pub async fn execute_with_timeout<F, Fut, T>(
        &self,
        timeout: Duration,
        op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let _slot = self.acquire(timeout, None).await?;
        op().await
    }

    /// Run `op` in a slot; waiting for the slot ends early if `cancel` fires
    pub async fn execute_with_cancel<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let _slot = self.acquire(timeout, Some(cancel)).await?;
        op().await
    }

    async fn acquire(
        &self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Slot<'_>, ResilienceError> {
        let permit = tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                self.reject("cancelled");
                return Err(ResilienceError::Cancelled);
            }
            acquired = tokio::time::timeout(timeout, self.semaphore.acquire()) => match acquired {
                Ok(Ok(permit)) => permit,
                // The semaphore is never closed, so an error here can only be a timeout
                _ => {
                    self.reject("timeout");
                    debug!(
                        bulkhead = %self.config.name,
                        timeout_ms = timeout.as_millis() as u64,
                        "No bulkhead slot available"
                    );
                    return Err(ResilienceError::BulkheadTimeout {
                        name: self.config.name.clone(),
                        timeout,
                    });
                }
            }
        };

        Ok(Slot::new(self, permit))
    }

    fn reject(&self, reason: &'static str) {
        self.sink.inc(
            names::BULKHEAD_REJECTED_TOTAL,
            &[("name", &self.config.name), ("reason", reason)],
        );
    }

    fn publish_active(&self, active: usize) {
        self.sink.set_gauge(
            names::BULKHEAD_ACTIVE_REQUESTS,
            &[("name", &self.config.name)],
            active as f64,
        );
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Held for the duration of one operation
struct Slot<'a> {
    bulkhead: &'a Bulkhead,
    _permit: SemaphorePermit<'a>,
}

impl<'a> Slot<'a> {
    fn new(bulkhead: &'a Bulkhead, permit: SemaphorePermit<'a>) -> Self {
        let active = bulkhead.active.fetch_add(1, Ordering::AcqRel) + 1;
        bulkhead.publish_active(active);
        bulkhead
            .sink
            .inc(names::BULKHEAD_EXECUTED_TOTAL, &[("name", &bulkhead.config.name)]);
        Self {
            bulkhead,
            _permit: permit,
        }
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        let active = self.bulkhead.active.fetch_sub(1, Ordering::AcqRel) - 1;
        self.bulkhead.publish_active(active);
    }
}
