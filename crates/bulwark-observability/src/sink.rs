//! The `MetricsSink` seam
//!
//! Every Bulwark component takes a sink at construction instead of reaching
//! for a process-wide registry. Production code hands in a
//! [`PrometheusSink`](crate::PrometheusSink), tests hand in a
//! [`RecordingSink`](crate::RecordingSink), and code that does not care uses
//! [`NoopSink`].
//!
//! Implementations must be cheap and must never block the guarded call path
//! for longer than a map lookup.

use std::fmt;
use std::sync::Arc;

/// A metric label: static key, borrowed value
pub type Label<'a> = (&'static str, &'a str);

/// Destination for counters, gauges and histogram observations
pub trait MetricsSink: Send + Sync + fmt::Debug {
    /// Add `value` to the counter `name` for the given label set
    fn increment_counter(&self, name: &'static str, labels: &[Label<'_>], value: u64);

    /// Set the gauge `name` for the given label set
    fn set_gauge(&self, name: &'static str, labels: &[Label<'_>], value: f64);

    /// Record one observation in the histogram `name`
    fn observe_histogram(&self, name: &'static str, labels: &[Label<'_>], value: f64);

    /// Increment a counter by one
    fn inc(&self, name: &'static str, labels: &[Label<'_>]) {
        self.increment_counter(name, labels, 1);
    }
}

/// Shared handle passed into component constructors
pub type SharedSink = Arc<dyn MetricsSink>;

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn increment_counter(&self, _name: &'static str, _labels: &[Label<'_>], _value: u64) {}

    fn set_gauge(&self, _name: &'static str, _labels: &[Label<'_>], _value: f64) {}

    fn observe_histogram(&self, _name: &'static str, _labels: &[Label<'_>], _value: f64) {}
}

/// Convenience constructor for a shared no-op sink
pub fn noop() -> SharedSink {
    Arc::new(NoopSink)
}

impl<S: MetricsSink + ?Sized> MetricsSink for Arc<S> {
    fn increment_counter(&self, name: &'static str, labels: &[Label<'_>], value: u64) {
        (**self).increment_counter(name, labels, value);
    }

    fn set_gauge(&self, name: &'static str, labels: &[Label<'_>], value: f64) {
        (**self).set_gauge(name, labels, value);
    }

    fn observe_histogram(&self, name: &'static str, labels: &[Label<'_>], value: f64) {
        (**self).observe_histogram(name, labels, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_sink_accepts_everything() {
        let sink = noop();
        sink.inc("anything_total", &[("name", "x")]);
        sink.set_gauge("anything", &[], 1.0);
        sink.observe_histogram("anything_seconds", &[("name", "x")], 0.2);
    }
}
