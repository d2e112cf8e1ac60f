//! SLI tracker: aggregate counters and a latency histogram per service
//!
//! Recording is a handful of atomic increments plus a read-locked map lookup
//! for the operation. No raw events are retained. Snapshots derive
//! availability, error rate and latency percentiles from the aggregates and
//! may be slightly stale relative to concurrent writers.

use crate::error::SliError;
use crate::outcome::{ErrorSeverity, RequestOutcome, DEFAULT_OPERATION};
use bulwark_observability::names::{self, LATENCY_BUCKETS_SECONDS};
use bulwark_observability::SharedSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

const BUCKETS: usize = LATENCY_BUCKETS_SECONDS.len();
const SEVERITIES: usize = ErrorSeverity::ALL.len();

fn severity_slot(severity: ErrorSeverity) -> usize {
    match severity {
        ErrorSeverity::Critical => 0,
        ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::Low => 3,
        ErrorSeverity::Info => 4,
    }
}

/// Error code recorded for failures that carry none
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN";

/// Failed requests sharing an error code and severity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCount {
    pub error_code: String,
    pub severity: ErrorSeverity,
    pub count: u64,
}

/// Point-in-time view of the aggregated SLIs
///
/// Percent fields are in `0..=100`; latencies are in milliseconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSnapshot {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    pub availability: f64,
    pub error_rate_percent: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub latency_avg_ms: f64,
    pub requests_per_second: f64,
    pub messages_per_second: f64,
    pub failures: Vec<FailureCount>,
}

impl MetricsSnapshot {
    /// Snapshot with request counts only; latency and rates are zero
    pub fn from_counts(total_requests: u64, failed_requests: u64) -> Self {
        let now = Utc::now();
        let failed_requests = failed_requests.min(total_requests);
        Self {
            window_start: now,
            window_end: now,
            total_requests,
            failed_requests,
            ..Default::default()
        }
        .with_derived_rates()
    }

    /// Re-derive the success count and percentages from the request counts
    ///
    /// Used for snapshots read from files, which usually carry only
    /// `total_requests` plus one of `failed_requests` / `success_requests`.
    pub fn normalized(mut self) -> Result<Self, SliError> {
        let total = self.total_requests;
        if self.failed_requests > total {
            return Err(SliError::InvalidSnapshot(format!(
                "failed_requests ({}) exceeds total_requests ({total})",
                self.failed_requests
            )));
        }
        if self.success_requests > total {
            return Err(SliError::InvalidSnapshot(format!(
                "success_requests ({}) exceeds total_requests ({total})",
                self.success_requests
            )));
        }
        if self.success_requests > 0 {
            if self.failed_requests == 0 {
                self.failed_requests = total - self.success_requests;
            } else if self.success_requests + self.failed_requests != total {
                return Err(SliError::InvalidSnapshot(format!(
                    "success_requests ({}) + failed_requests ({}) != total_requests ({total})",
                    self.success_requests, self.failed_requests
                )));
            }
        }
        Ok(self.with_derived_rates())
    }

    fn with_derived_rates(mut self) -> Self {
        self.success_requests = self.total_requests - self.failed_requests;
        self.availability = availability_percent(self.total_requests, self.success_requests);
        self.error_rate_percent = error_rate_percent(self.total_requests, self.failed_requests);
        self
    }

    pub fn with_latencies(mut self, p50_ms: f64, p95_ms: f64, p99_ms: f64) -> Self {
        self.latency_p50_ms = p50_ms;
        self.latency_p95_ms = p95_ms;
        self.latency_p99_ms = p99_ms;
        self
    }
}

/// No traffic means nothing failed: availability is 100%
fn availability_percent(total: u64, success: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        success as f64 / total as f64 * 100.0
    }
}

fn error_rate_percent(total: u64, failed: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failed as f64 / total as f64 * 100.0
    }
}

/// Supplies the aggregated snapshot consumed by the budget calculator,
/// alert evaluator and SLO validator
pub trait MetricsSource: Send + Sync {
    /// Aggregates covering `window`
    ///
    /// Sources that cannot slice by window return their full aggregation.
    fn snapshot(&self, window: Duration) -> Result<MetricsSnapshot, SliError>;
}

/// Fixed snapshots, optionally one per window
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    default: MetricsSnapshot,
    windows: HashMap<Duration, MetricsSnapshot>,
}

impl StaticSource {
    pub fn new(snapshot: MetricsSnapshot) -> Self {
        Self {
            default: snapshot,
            windows: HashMap::new(),
        }
    }

    /// Serve `snapshot` for exactly `window`
    pub fn with_window(mut self, window: Duration, snapshot: MetricsSnapshot) -> Self {
        self.windows.insert(window, snapshot);
        self
    }
}

impl MetricsSource for StaticSource {
    fn snapshot(&self, window: Duration) -> Result<MetricsSnapshot, SliError> {
        Ok(self
            .windows
            .get(&window)
            .unwrap_or(&self.default)
            .clone())
    }
}

/// Source that always reports an empty window
#[derive(Debug, Clone, Copy, Default)]
pub struct NopSource;

impl MetricsSource for NopSource {
    fn snapshot(&self, _window: Duration) -> Result<MetricsSnapshot, SliError> {
        Ok(MetricsSnapshot::default())
    }
}

impl<S: MetricsSource + ?Sized> MetricsSource for Arc<S> {
    fn snapshot(&self, window: Duration) -> Result<MetricsSnapshot, SliError> {
        (**self).snapshot(window)
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    throughput: AtomicU64,
    /// Non-cumulative bucket counts; the last slot is `+Inf`
    latency_buckets: [AtomicU64; BUCKETS + 1],
    latency_count: AtomicU64,
    latency_sum_nanos: AtomicU64,
}

impl Counters {
    fn record(&self, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn observe_latency(&self, latency: Duration) {
        let secs = latency.as_secs_f64();
        let bucket = LATENCY_BUCKETS_SECONDS
            .iter()
            .position(|&upper| secs <= upper)
            .unwrap_or(BUCKETS);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_sum_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Latency quantile in milliseconds, interpolated linearly inside the
    /// bucket that holds the requested rank
    fn quantile_ms(&self, q: f64) -> f64 {
        let counts: Vec<u64> = self
            .latency_buckets
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        let observed: u64 = counts.iter().sum();
        if observed == 0 {
            return 0.0;
        }

        let rank = q * observed as f64;
        let mut below = 0u64;
        for (i, &count) in counts.iter().enumerate() {
            if count > 0 && (below + count) as f64 >= rank {
                if i == BUCKETS {
                    // Observations past the last bound cannot be placed more precisely
                    return LATENCY_BUCKETS_SECONDS[BUCKETS - 1] * 1000.0;
                }
                let lower = if i == 0 {
                    0.0
                } else {
                    LATENCY_BUCKETS_SECONDS[i - 1]
                };
                let upper = LATENCY_BUCKETS_SECONDS[i];
                let fraction = (rank - below as f64) / count as f64;
                return (lower + (upper - lower) * fraction) * 1000.0;
            }
            below += count;
        }
        LATENCY_BUCKETS_SECONDS[BUCKETS - 1] * 1000.0
    }

    fn snapshot(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let success = self.success.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let throughput = self.throughput.load(Ordering::Relaxed);
        let latency_count = self.latency_count.load(Ordering::Relaxed);
        let latency_sum_nanos = self.latency_sum_nanos.load(Ordering::Relaxed);

        let elapsed_secs = (window_end - window_start)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let per_second = |count: u64| {
            if elapsed_secs > 0.0 {
                count as f64 / elapsed_secs
            } else {
                0.0
            }
        };

        MetricsSnapshot {
            window_start,
            window_end,
            total_requests: total,
            success_requests: success,
            failed_requests: failed,
            availability: availability_percent(total, success),
            error_rate_percent: error_rate_percent(total, failed),
            latency_p50_ms: self.quantile_ms(0.50),
            latency_p95_ms: self.quantile_ms(0.95),
            latency_p99_ms: self.quantile_ms(0.99),
            latency_avg_ms: if latency_count == 0 {
                0.0
            } else {
                latency_sum_nanos as f64 / latency_count as f64 / 1_000_000.0
            },
            requests_per_second: per_second(total),
            messages_per_second: per_second(throughput),
            failures: Vec::new(),
        }
    }
}

/// Aggregation since construction or the last reset
#[derive(Debug)]
struct Window {
    started_at: DateTime<Utc>,
    overall: Counters,
    operations: RwLock<HashMap<String, Arc<Counters>>>,
    /// Failure counts per error code, one slot per [`ErrorSeverity::ALL`] entry
    failures: RwLock<HashMap<String, [AtomicU64; SEVERITIES]>>,
}

impl Window {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            overall: Counters::default(),
            operations: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
        }
    }

    fn operation(&self, name: &str) -> Arc<Counters> {
        if let Some(counters) = self
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return counters.clone();
        }
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn count_failure(&self, code: &str, severity: ErrorSeverity) {
        let slot = severity_slot(severity);
        if let Some(counts) = self
            .failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
        {
            counts[slot].fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(code.to_string())
            .or_default()[slot]
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Failure counts sorted by error code, then severity
    fn failures(&self) -> Vec<FailureCount> {
        let failures = self.failures.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts: Vec<FailureCount> = failures
            .iter()
            .flat_map(|(code, slots)| {
                ErrorSeverity::ALL
                    .iter()
                    .zip(slots)
                    .filter_map(move |(severity, count)| {
                        let count = count.load(Ordering::Relaxed);
                        (count > 0).then(|| FailureCount {
                            error_code: code.clone(),
                            severity: *severity,
                            count,
                        })
                    })
            })
            .collect();
        counts.sort_by(|a, b| (&a.error_code, a.severity).cmp(&(&b.error_code, b.severity)));
        counts
    }
}

/// Records request outcomes for one service
///
/// # Example
/// ```
/// use bulwark_core_sli::{RequestOutcome, SliTracker};
/// use std::time::Duration;
///
/// let tracker = SliTracker::new("checkout", bulwark_observability::noop());
/// tracker.record_request(&RequestOutcome::success("pay", Duration::from_millis(12)));
///
/// let metrics = tracker.metrics();
/// assert_eq!(metrics.total_requests, 1);
/// assert_eq!(metrics.availability, 100.0);
/// ```
#[derive(Debug)]
pub struct SliTracker {
    service: String,
    sink: SharedSink,
    window: RwLock<Arc<Window>>,
}

impl SliTracker {
    pub fn new(service: impl Into<String>, sink: SharedSink) -> Self {
        Self {
            service: service.into(),
            sink,
            window: RwLock::new(Arc::new(Window::new())),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    fn current(&self) -> Arc<Window> {
        self.window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Count one request and observe its latency
    pub fn record_request(&self, outcome: &RequestOutcome) {
        let operation = outcome.operation_name();
        let window = self.current();
        let per_operation = window.operation(operation);

        window.overall.record(outcome.success);
        per_operation.record(outcome.success);

        let labels = [("service", self.service.as_str()), ("operation", operation)];
        self.sink.inc(names::SLI_REQUESTS_TOTAL, &labels);

        if outcome.success {
            self.sink.inc(names::SLI_REQUESTS_SUCCESS_TOTAL, &labels);
        } else {
            let code = outcome.error_code.as_deref().unwrap_or(UNKNOWN_ERROR_CODE);
            let severity = outcome.error_severity.unwrap_or(ErrorSeverity::Medium);
            window.count_failure(code, severity);
            self.sink.inc(
                names::SLI_REQUESTS_FAILED_TOTAL,
                &[
                    ("service", self.service.as_str()),
                    ("operation", operation),
                    ("error_code", code),
                    ("severity", severity.as_str()),
                ],
            );
            debug!(
                service = %self.service,
                operation,
                error_code = code,
                severity = %severity,
                "Recorded failed request"
            );
        }

        window.overall.observe_latency(outcome.latency);
        per_operation.observe_latency(outcome.latency);
        self.sink.observe_histogram(
            names::SLI_REQUEST_DURATION_SECONDS,
            &labels,
            outcome.latency.as_secs_f64(),
        );
    }

    /// Observe a latency without counting a request
    pub fn record_latency(&self, latency: Duration, operation: &str) {
        let operation = if operation.is_empty() {
            DEFAULT_OPERATION
        } else {
            operation
        };
        let window = self.current();
        window.overall.observe_latency(latency);
        window.operation(operation).observe_latency(latency);
        self.sink.observe_histogram(
            names::SLI_REQUEST_DURATION_SECONDS,
            &[("service", self.service.as_str()), ("operation", operation)],
            latency.as_secs_f64(),
        );
    }

    /// Count processed messages or other throughput units
    pub fn record_throughput(&self, count: u64, operation: &str) {
        let operation = if operation.is_empty() {
            DEFAULT_OPERATION
        } else {
            operation
        };
        let window = self.current();
        window.overall.throughput.fetch_add(count, Ordering::Relaxed);
        window
            .operation(operation)
            .throughput
            .fetch_add(count, Ordering::Relaxed);
        self.sink.increment_counter(
            names::SLI_THROUGHPUT_TOTAL,
            &[("service", self.service.as_str()), ("operation", operation)],
            count,
        );
    }

    /// Snapshot across all operations; also publishes the SLI gauges
    pub fn metrics(&self) -> MetricsSnapshot {
        let window = self.current();
        let mut snapshot = window.overall.snapshot(window.started_at, Utc::now());
        snapshot.failures = window.failures();

        let service = [("service", self.service.as_str())];
        self.sink
            .set_gauge(names::SLI_AVAILABILITY_PERCENT, &service, snapshot.availability);
        self.sink
            .set_gauge(names::SLI_LATENCY_P95_MILLISECONDS, &service, snapshot.latency_p95_ms);
        self.sink
            .set_gauge(names::SLI_LATENCY_P99_MILLISECONDS, &service, snapshot.latency_p99_ms);
        self.sink
            .set_gauge(names::SLI_ERROR_RATE_PERCENT, &service, snapshot.error_rate_percent);

        snapshot
    }

    /// Snapshot for a single operation, if it has recorded anything
    pub fn operation_snapshot(&self, operation: &str) -> Option<MetricsSnapshot> {
        let window = self.current();
        let counters = window
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .cloned()?;
        Some(counters.snapshot(window.started_at, Utc::now()))
    }

    /// Names of operations seen in the current window, sorted
    pub fn operations(&self) -> Vec<String> {
        let window = self.current();
        let mut names: Vec<String> = window
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Discard all aggregates and start a new window
    pub fn reset(&self) {
        *self.window.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(Window::new());
        debug!(service = %self.service, "SLI window reset");
    }
}

impl MetricsSource for SliTracker {
    /// The tracker aggregates since construction or the last
    /// [`reset`](SliTracker::reset); `window` only labels the result
    fn snapshot(&self, _window: Duration) -> Result<MetricsSnapshot, SliError> {
        Ok(self.metrics())
    }
}
