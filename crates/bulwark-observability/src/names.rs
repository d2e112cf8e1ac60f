//! Metric names exported by Bulwark components
//!
//! Names follow the Prometheus conventions (`_total` for counters, base units
//! in the suffix). They are plain `&'static str` so every sink can key on them
//! without allocating.

/// Circuit breaker state gauge (0=closed, 1=half_open, 2=open)
/// Labels: name
pub const BREAKER_STATE: &str = "circuit_breaker_state";

/// Calls through a circuit breaker
/// Labels: name, state (state at call time), result (success, error, rejected)
pub const BREAKER_REQUESTS_TOTAL: &str = "circuit_breaker_requests_total";

/// Failures counted against a circuit breaker
/// Labels: name
pub const BREAKER_ERRORS_TOTAL: &str = "circuit_breaker_errors_total";

/// Circuit breaker transitions
/// Labels: name, from, to
pub const BREAKER_STATE_CHANGES_TOTAL: &str = "circuit_breaker_state_changes_total";

/// Labels: name, attempt (1, 2, 3, 4+)
pub const RETRY_ATTEMPTS_TOTAL: &str = "retry_attempts_total";

/// Labels: name, attempt
pub const RETRY_SUCCESS_TOTAL: &str = "retry_success_total";

/// Operations that failed after retrying (exhausted, non-retryable or cancelled)
/// Labels: name, reason
pub const RETRY_FAILURE_TOTAL: &str = "retry_failure_total";

/// Labels: name
pub const RETRY_DELAY_SECONDS: &str = "retry_delay_seconds";

pub const RATE_LIMIT_REQUESTS_TOTAL: &str = "rate_limit_requests_total";
pub const RATE_LIMIT_ALLOWED_TOTAL: &str = "rate_limit_allowed_total";
pub const RATE_LIMIT_REJECTED_TOTAL: &str = "rate_limit_rejected_total";
pub const RATE_LIMIT_TOKENS_AVAILABLE: &str = "rate_limit_tokens_available";

pub const BULKHEAD_ACTIVE_REQUESTS: &str = "bulkhead_active_requests";
/// Labels: name, reason (timeout, cancelled)
pub const BULKHEAD_REJECTED_TOTAL: &str = "bulkhead_rejected_total";
pub const BULKHEAD_EXECUTED_TOTAL: &str = "bulkhead_executed_total";

/// Labels: service, operation
pub const SLI_REQUESTS_TOTAL: &str = "sli_requests_total";
/// Labels: service, operation
pub const SLI_REQUESTS_SUCCESS_TOTAL: &str = "sli_requests_success_total";
/// Labels: service, operation, error_code, severity
pub const SLI_REQUESTS_FAILED_TOTAL: &str = "sli_requests_failed_total";
/// Labels: service, operation
pub const SLI_REQUEST_DURATION_SECONDS: &str = "sli_request_duration_seconds";
/// Labels: service, operation
pub const SLI_THROUGHPUT_TOTAL: &str = "sli_throughput_total";
/// Labels: service
pub const SLI_AVAILABILITY_PERCENT: &str = "sli_availability_percent";
/// Labels: service
pub const SLI_LATENCY_P95_MILLISECONDS: &str = "sli_latency_p95_milliseconds";
/// Labels: service
pub const SLI_LATENCY_P99_MILLISECONDS: &str = "sli_latency_p99_milliseconds";
/// Labels: service
pub const SLI_ERROR_RATE_PERCENT: &str = "sli_error_rate_percent";

/// Request latency buckets in seconds, shared by the SLI histogram and the
/// tracker's own percentile estimation.
pub const LATENCY_BUCKETS_SECONDS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Retry backoff buckets in seconds
pub const RETRY_DELAY_BUCKETS_SECONDS: [f64; 9] = [0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];

/// Help text registered alongside a metric
pub fn help(name: &str) -> &'static str {
    match name {
        BREAKER_STATE => "Circuit breaker state (0=closed, 1=half_open, 2=open)",
        BREAKER_REQUESTS_TOTAL => "Total requests through circuit breaker",
        BREAKER_ERRORS_TOTAL => "Total errors in circuit breaker",
        BREAKER_STATE_CHANGES_TOTAL => "Total circuit breaker state transitions",
        RETRY_ATTEMPTS_TOTAL => "Total retry attempts",
        RETRY_SUCCESS_TOTAL => "Total successful retries",
        RETRY_FAILURE_TOTAL => "Total failed retries (after all attempts)",
        RETRY_DELAY_SECONDS => "Delay between retry attempts",
        RATE_LIMIT_REQUESTS_TOTAL => "Total requests to rate limiter",
        RATE_LIMIT_ALLOWED_TOTAL => "Total requests allowed by rate limiter",
        RATE_LIMIT_REJECTED_TOTAL => "Total requests rejected by rate limiter",
        RATE_LIMIT_TOKENS_AVAILABLE => "Number of tokens currently available",
        BULKHEAD_ACTIVE_REQUESTS => "Number of active requests in bulkhead",
        BULKHEAD_REJECTED_TOTAL => "Total requests rejected by bulkhead",
        BULKHEAD_EXECUTED_TOTAL => "Total requests executed through bulkhead",
        SLI_REQUESTS_TOTAL => "Total number of requests for SLI tracking",
        SLI_REQUESTS_SUCCESS_TOTAL => "Total number of successful requests",
        SLI_REQUESTS_FAILED_TOTAL => "Total number of failed requests",
        SLI_REQUEST_DURATION_SECONDS => "Request duration in seconds for SLI tracking",
        SLI_THROUGHPUT_TOTAL => "Throughput events (requests or messages) recorded",
        SLI_AVAILABILITY_PERCENT => "Current availability SLI in percent",
        SLI_LATENCY_P95_MILLISECONDS => "P95 latency SLI in milliseconds",
        SLI_LATENCY_P99_MILLISECONDS => "P99 latency SLI in milliseconds",
        SLI_ERROR_RATE_PERCENT => "Current error rate SLI in percent",
        _ => "Bulwark metric",
    }
}

/// Histogram buckets for a metric, if it has dedicated ones
pub fn buckets(name: &str) -> Option<Vec<f64>> {
    match name {
        SLI_REQUEST_DURATION_SECONDS => Some(LATENCY_BUCKETS_SECONDS.to_vec()),
        RETRY_DELAY_SECONDS => Some(RETRY_DELAY_BUCKETS_SECONDS.to_vec()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_exported_name_has_help() {
        for name in [
            BREAKER_STATE,
            BREAKER_REQUESTS_TOTAL,
            RETRY_ATTEMPTS_TOTAL,
            RATE_LIMIT_TOKENS_AVAILABLE,
            BULKHEAD_ACTIVE_REQUESTS,
            SLI_REQUESTS_FAILED_TOTAL,
            SLI_ERROR_RATE_PERCENT,
        ] {
            assert_ne!(help(name), help("unknown_metric"), "{name} has no help text");
        }
    }

    #[test]
    fn test_latency_buckets_are_sorted() {
        assert!(LATENCY_BUCKETS_SECONDS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(buckets(SLI_REQUEST_DURATION_SECONDS).map(|b| b.len()), Some(12));
        assert!(buckets(BREAKER_STATE).is_none());
    }
}
