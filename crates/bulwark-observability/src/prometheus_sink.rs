//! Prometheus-backed metrics sink
//!
//! Unlike a global registry, every [`PrometheusSink`] owns its own
//! [`Registry`]. Metric vectors are registered lazily the first time a name is
//! used; the label keys of that first call fix the label schema for the name.
//! Calls with a mismatching label schema are logged and dropped, never
//! propagated into the guarded call path.

use crate::error::SinkError;
use crate::names;
use crate::sink::{Label, MetricsSink};
use prometheus::core::Collector;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::warn;

/// Metrics sink that exposes everything through an owned Prometheus registry
pub struct PrometheusSink {
    registry: Registry,
    counters: RwLock<HashMap<&'static str, IntCounterVec>>,
    gauges: RwLock<HashMap<&'static str, GaugeVec>>,
    histograms: RwLock<HashMap<&'static str, HistogramVec>>,
}

impl PrometheusSink {
    /// Create a sink with a fresh, empty registry
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// Create a sink whose metric names are prefixed with `namespace_`
    pub fn with_namespace(namespace: &str) -> Result<Self, SinkError> {
        let registry = Registry::new_custom(Some(namespace.to_string()), None)?;
        Ok(Self::with_registry(registry))
    }

    /// Wrap an existing registry (e.g. one shared with an HTTP exporter)
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String, SinkError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn register<C>(&self, collector: C) -> Result<C, SinkError>
    where
        C: Collector + Clone + 'static,
    {
        self.registry.register(Box::new(collector.clone()))?;
        Ok(collector)
    }

    fn counter_vec(&self, name: &'static str, keys: &[&str]) -> Option<IntCounterVec> {
        get_or_register(&self.counters, name, || {
            let vec = IntCounterVec::new(Opts::new(name, names::help(name)), keys)?;
            self.register(vec)
        })
    }

    fn gauge_vec(&self, name: &'static str, keys: &[&str]) -> Option<GaugeVec> {
        get_or_register(&self.gauges, name, || {
            let vec = GaugeVec::new(Opts::new(name, names::help(name)), keys)?;
            self.register(vec)
        })
    }

    fn histogram_vec(&self, name: &'static str, keys: &[&str]) -> Option<HistogramVec> {
        get_or_register(&self.histograms, name, || {
            let mut opts = HistogramOpts::new(name, names::help(name));
            if let Some(buckets) = names::buckets(name) {
                opts = opts.buckets(buckets);
            }
            let vec = HistogramVec::new(opts, keys)?;
            self.register(vec)
        })
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let families = self.registry.gather().len();
        f.debug_struct("PrometheusSink")
            .field("families", &families)
            .finish()
    }
}

impl MetricsSink for PrometheusSink {
    fn increment_counter(&self, name: &'static str, labels: &[Label<'_>], value: u64) {
        let (keys, values) = split(labels);
        if let Some(vec) = self.counter_vec(name, &keys) {
            match vec.get_metric_with_label_values(&values) {
                Ok(counter) => counter.inc_by(value),
                Err(e) => warn!(metric = name, error = %e, "dropping counter update"),
            }
        }
    }

    fn set_gauge(&self, name: &'static str, labels: &[Label<'_>], value: f64) {
        let (keys, values) = split(labels);
        if let Some(vec) = self.gauge_vec(name, &keys) {
            match vec.get_metric_with_label_values(&values) {
                Ok(gauge) => gauge.set(value),
                Err(e) => warn!(metric = name, error = %e, "dropping gauge update"),
            }
        }
    }

    fn observe_histogram(&self, name: &'static str, labels: &[Label<'_>], value: f64) {
        let (keys, values) = split(labels);
        if let Some(vec) = self.histogram_vec(name, &keys) {
            match vec.get_metric_with_label_values(&values) {
                Ok(histogram) => histogram.observe(value),
                Err(e) => warn!(metric = name, error = %e, "dropping histogram observation"),
            }
        }
    }
}

fn split<'a>(labels: &[Label<'a>]) -> (Vec<&'static str>, Vec<&'a str>) {
    labels.iter().map(|(k, v)| (*k, *v)).unzip()
}

fn get_or_register<V, F>(
    map: &RwLock<HashMap<&'static str, V>>,
    name: &'static str,
    create: F,
) -> Option<V>
where
    V: Clone,
    F: FnOnce() -> Result<V, SinkError>,
{
    if let Some(existing) = map.read().unwrap_or_else(PoisonError::into_inner).get(name) {
        return Some(existing.clone());
    }

    let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = map.get(name) {
        return Some(existing.clone());
    }

    match create() {
        Ok(vec) => {
            map.insert(name, vec.clone());
            Some(vec)
        }
        Err(e) => {
            warn!(metric = name, error = %e, "failed to register metric");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_exported() {
        let sink = PrometheusSink::new();
        sink.inc(names::BREAKER_REQUESTS_TOTAL, &[("name", "db"), ("state", "closed"), ("result", "success")]);
        sink.inc(names::BREAKER_REQUESTS_TOTAL, &[("name", "db"), ("state", "closed"), ("result", "success")]);

        let text = sink.encode_text().unwrap();
        assert!(text.contains("# HELP circuit_breaker_requests_total"));
        assert!(text.lines().any(|line| {
            line.starts_with("circuit_breaker_requests_total{")
                && line.contains(r#"result="success""#)
                && line.ends_with(" 2")
        }));
    }

    #[test]
    fn test_gauge_and_histogram() {
        let sink = PrometheusSink::new();
        sink.set_gauge(names::BULKHEAD_ACTIVE_REQUESTS, &[("name", "pool")], 3.0);
        sink.observe_histogram(
            names::SLI_REQUEST_DURATION_SECONDS,
            &[("service", "api"), ("operation", "GET /users")],
            0.04,
        );

        let text = sink.encode_text().unwrap();
        assert!(text.contains(r#"bulkhead_active_requests{name="pool"} 3"#));
        assert!(text.contains("sli_request_duration_seconds_bucket"));
        assert!(text.contains(r#"le="0.05""#));
    }

    #[test]
    fn test_label_schema_mismatch_is_dropped() {
        let sink = PrometheusSink::new();
        sink.inc(names::RATE_LIMIT_ALLOWED_TOTAL, &[("name", "a")]);
        // Different label keys for the same name must not panic
        sink.inc(names::RATE_LIMIT_ALLOWED_TOTAL, &[("name", "a"), ("extra", "b")]);

        let text = sink.encode_text().unwrap();
        assert!(text.contains(r#"rate_limit_allowed_total{name="a"} 1"#));
    }

    #[test]
    fn test_sinks_do_not_share_state() {
        let first = PrometheusSink::new();
        let second = PrometheusSink::new();
        first.inc(names::RETRY_FAILURE_TOTAL, &[("name", "x"), ("reason", "exhausted")]);

        assert!(first.encode_text().unwrap().contains("retry_failure_total"));
        assert!(!second.encode_text().unwrap().contains("retry_failure_total"));
    }

    #[test]
    fn test_namespace_prefix() {
        let sink = PrometheusSink::with_namespace("orders").unwrap();
        sink.set_gauge(names::SLI_AVAILABILITY_PERCENT, &[("service", "orders")], 99.5);
        assert!(sink.encode_text().unwrap().contains("orders_sli_availability_percent"));
    }
}
