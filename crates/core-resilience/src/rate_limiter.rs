//! Token bucket rate limiting
//!
//! The bucket holds at most `burst` tokens and refills continuously at
//! `requests_per_second`, proportionally to elapsed time. Each admitted
//! request removes one token.

use crate::error::ResilienceError;
use async_trait::async_trait;
use bulwark_observability::{names, SharedSink};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Absorbs float error in the refill arithmetic
const TOKEN_EPSILON: f64 = 1e-9;

/// Longest single sleep in `wait_acquire`; the bucket is re-checked after it
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Admission control seam used by the dependency guard
#[async_trait]
pub trait Admission: Send + Sync + std::fmt::Debug {
    /// Take a token if one is available, never waiting
    fn try_acquire(&self) -> bool;

    /// Wait for a token; returns `false` if `cancel` fires first
    async fn wait_acquire(&self, cancel: &CancellationToken) -> bool;
}

/// Configuration for a token bucket
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Limiter name, used as the metrics label
    pub name: String,
    /// Sustained refill rate
    pub requests_per_second: f64,
    /// Bucket capacity; the bucket starts full
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            requests_per_second: 100.0,
            burst: 100,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "rate limiter '{}': requests_per_second must be positive, got {}",
                self.name, self.requests_per_second
            )));
        }
        if self.burst == 0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "rate limiter '{}': burst must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
///
/// Clones share the same bucket.
///
/// # Example
/// ```
/// use bulwark_core_resilience::{RateLimiter, RateLimiterConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let limiter = RateLimiter::new(
///     RateLimiterConfig {
///         name: "search".to_string(),
///         requests_per_second: 10.0,
///         burst: 2,
///     },
///     bulwark_observability::noop(),
/// )
/// .unwrap();
///
/// assert!(limiter.try_acquire());
/// assert!(limiter.try_acquire());
/// assert!(!limiter.try_acquire());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: Arc<RateLimiterConfig>,
    bucket: Arc<Mutex<Bucket>>,
    sink: SharedSink,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, sink: SharedSink) -> Result<Self, ResilienceError> {
        config.validate()?;
        let bucket = Bucket {
            tokens: f64::from(config.burst),
            last_refill: Instant::now(),
        };
        sink.set_gauge(
            names::RATE_LIMIT_TOKENS_AVAILABLE,
            &[("name", &config.name)],
            bucket.tokens,
        );
        Ok(Self {
            config: Arc::new(config),
            bucket: Arc::new(Mutex::new(bucket)),
            sink,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Tokens currently in the bucket, after refill
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Take a token if one is available
    pub fn try_acquire(&self) -> bool {
        self.sink
            .inc(names::RATE_LIMIT_REQUESTS_TOTAL, &[("name", &self.config.name)]);

        if self.take().is_ok() {
            self.allowed();
            true
        } else {
            self.rejected();
            false
        }
    }

    /// Like [`try_acquire`](Self::try_acquire), mapping rejection to
    /// [`ResilienceError::RateLimitExceeded`]
    pub fn check(&self) -> Result<(), ResilienceError> {
        if self.try_acquire() {
            Ok(())
        } else {
            Err(ResilienceError::RateLimitExceeded {
                name: self.config.name.clone(),
            })
        }
    }

    /// Wait until a token is available or `cancel` fires
    pub async fn wait_acquire(&self, cancel: &CancellationToken) -> bool {
        self.sink
            .inc(names::RATE_LIMIT_REQUESTS_TOTAL, &[("name", &self.config.name)]);

        loop {
            let wait = match self.take() {
                Ok(()) => {
                    self.allowed();
                    return true;
                }
                Err(wait) => wait,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.rejected();
                    debug!(limiter = %self.config.name, "Wait for rate limit token cancelled");
                    return false;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let capacity = f64::from(self.config.burst);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.config.requests_per_second).min(capacity);
        bucket.last_refill = now;
    }

    /// Remove one token, or report how long until one is available
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = self.lock();
        self.refill(&mut bucket);

        let outcome = if bucket.tokens + TOKEN_EPSILON >= 1.0 {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait = Duration::try_from_secs_f64(deficit / self.config.requests_per_second)
                .unwrap_or(MAX_WAIT);
            Err(wait.min(MAX_WAIT))
        };

        self.sink.set_gauge(
            names::RATE_LIMIT_TOKENS_AVAILABLE,
            &[("name", &self.config.name)],
            bucket.tokens,
        );
        outcome
    }

    fn allowed(&self) {
        self.sink
            .inc(names::RATE_LIMIT_ALLOWED_TOTAL, &[("name", &self.config.name)]);
    }

    fn rejected(&self) {
        self.sink
            .inc(names::RATE_LIMIT_REJECTED_TOTAL, &[("name", &self.config.name)]);
    }
}

#[async_trait]
impl Admission for RateLimiter {
    fn try_acquire(&self) -> bool {
        RateLimiter::try_acquire(self)
    }

    async fn wait_acquire(&self, cancel: &CancellationToken) -> bool {
        RateLimiter::wait_acquire(self, cancel).await
    }
}

/// Rate limiter backed by the governor crate (when feature is enabled)
///
/// Governor implements GCRA, which admits the same long-run rate and burst
/// as the token bucket above. It keeps its own clock, so it does not follow
/// tokio's paused test time.
#[cfg(feature = "governor-impl")]
pub mod governor_impl {
    use super::*;
    use governor::{
        clock::DefaultClock,
        state::{InMemoryState, NotKeyed},
        Quota, RateLimiter as DirectLimiter,
    };
    use std::num::NonZeroU32;

    /// [`Admission`] implementation using governor
    #[derive(Clone)]
    pub struct GovernorRateLimiter {
        config: Arc<RateLimiterConfig>,
        limiter: Arc<DirectLimiter<NotKeyed, InMemoryState, DefaultClock>>,
        sink: SharedSink,
    }

    impl std::fmt::Debug for GovernorRateLimiter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("GovernorRateLimiter")
                .field("config", &self.config)
                .finish_non_exhaustive()
        }
    }

    impl GovernorRateLimiter {
        pub fn new(config: RateLimiterConfig, sink: SharedSink) -> Result<Self, ResilienceError> {
            config.validate()?;
            let burst = NonZeroU32::new(config.burst).ok_or_else(|| {
                ResilienceError::InvalidConfig("burst must be at least 1".to_string())
            })?;
            let period = Duration::try_from_secs_f64(1.0 / config.requests_per_second)
                .map_err(|_| {
                    ResilienceError::InvalidConfig(format!(
                        "rate limiter '{}': refill period of {}s is out of range",
                        config.name,
                        1.0 / config.requests_per_second
                    ))
                })?;

            let quota = Quota::with_period(period)
                .ok_or_else(|| {
                    ResilienceError::InvalidConfig(format!(
                        "rate limiter '{}': refill period rounds to zero",
                        config.name
                    ))
                })?
                .allow_burst(burst);

            Ok(Self {
                config: Arc::new(config),
                limiter: Arc::new(DirectLimiter::direct(quota)),
                sink,
            })
        }

        fn count(&self, allowed: bool) {
            let name = [("name", self.config.name.as_str())];
            self.sink.inc(names::RATE_LIMIT_REQUESTS_TOTAL, &name);
            if allowed {
                self.sink.inc(names::RATE_LIMIT_ALLOWED_TOTAL, &name);
            } else {
                self.sink.inc(names::RATE_LIMIT_REJECTED_TOTAL, &name);
            }
        }
    }

    #[async_trait]
    impl Admission for GovernorRateLimiter {
        fn try_acquire(&self) -> bool {
            let allowed = self.limiter.check().is_ok();
            self.count(allowed);
            allowed
        }

        async fn wait_acquire(&self, cancel: &CancellationToken) -> bool {
            let allowed = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = self.limiter.until_ready() => true,
            };
            self.count(allowed);
            allowed
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_observability::RecordingSink;

    fn limiter(rps: f64, burst: u32) -> (RateLimiter, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let limiter = RateLimiter::new(
            RateLimiterConfig {
                name: "api".to_string(),
                requests_per_second: rps,
                burst,
            },
            sink.clone(),
        )
        .unwrap();
        (limiter, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let (limiter, sink) = limiter(10.0, 10);

        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        assert_eq!(sink.counter(names::RATE_LIMIT_REQUESTS_TOTAL, &[("name", "api")]), 13);
        assert_eq!(sink.counter(names::RATE_LIMIT_ALLOWED_TOTAL, &[("name", "api")]), 11);
        assert_eq!(sink.counter(names::RATE_LIMIT_REJECTED_TOTAL, &[("name", "api")]), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_capped_at_burst() {
        let (limiter, sink) = limiter(100.0, 5);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available_tokens(), 5.0);

        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        assert_eq!(
            sink.gauge(names::RATE_LIMIT_TOKENS_AVAILABLE, &[("name", "api")]),
            Some(0.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_acquire_blocks_until_refill() {
        let (limiter, _) = limiter(2.0, 1);
        let cancel = CancellationToken::new();

        assert!(limiter.try_acquire());
        let start = Instant::now();
        assert!(limiter.wait_acquire(&cancel).await);
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_acquire_cancelled() {
        let (limiter, sink) = limiter(0.1, 1);
        let cancel = CancellationToken::new();
        assert!(limiter.try_acquire());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        assert!(!limiter.wait_acquire(&cancel).await);
        assert_eq!(sink.counter(names::RATE_LIMIT_REJECTED_TOTAL, &[]), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_rate_waits_in_bounded_steps() {
        let (limiter, _) = limiter(1e-20, 1);
        assert!(limiter.try_acquire());

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(!limiter.wait_acquire(&cancelled).await);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let start = Instant::now();
        let (admitted, ()) = tokio::join!(limiter.wait_acquire(&cancel), async {
            tokio::time::sleep(MAX_WAIT * 3).await;
            trigger.cancel();
        });
        assert!(!admitted);
        assert_eq!(start.elapsed(), MAX_WAIT * 3);
    }

    #[tokio::test]
    async fn test_check_maps_to_error() {
        let (limiter, _) = limiter(1.0, 1);
        assert!(limiter.check().is_ok());
        assert!(matches!(
            limiter.check(),
            Err(ResilienceError::RateLimitExceeded { ref name }) if name == "api"
        ));
    }

    #[tokio::test]
    async fn test_admission_trait_object() {
        let (limiter, _) = limiter(1.0, 1);
        let admission: Arc<dyn Admission> = Arc::new(limiter);
        assert!(admission.try_acquire());
        assert!(!admission.try_acquire());
    }

    #[test]
    fn test_invalid_config() {
        let config = RateLimiterConfig {
            requests_per_second: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RateLimiterConfig {
            burst: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
