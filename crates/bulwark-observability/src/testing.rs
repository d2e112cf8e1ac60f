//! In-memory sink for tests
//!
//! [`RecordingSink`] keeps every counter, gauge and histogram observation so
//! tests can assert on exactly what a component emitted, without touching a
//! process-wide registry.
//!
//! ## Example
//!
//! ```
//! use bulwark_observability::{MetricsSink, RecordingSink};
//!
//! let sink = RecordingSink::new();
//! sink.inc("retry_attempts_total", &[("name", "db"), ("attempt", "1")]);
//! sink.inc("retry_attempts_total", &[("name", "db"), ("attempt", "2")]);
//!
//! // Lookups match on a subset of labels and sum every matching series
//! assert_eq!(sink.counter("retry_attempts_total", &[("name", "db")]), 2);
//! assert_eq!(sink.counter("retry_attempts_total", &[("attempt", "2")]), 1);
//! ```

use crate::sink::{Label, MetricsSink};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

type SeriesKey = (String, Vec<(String, String)>);

#[derive(Debug, Default)]
struct Recorded {
    counters: BTreeMap<SeriesKey, u64>,
    gauges: BTreeMap<SeriesKey, f64>,
    histograms: BTreeMap<SeriesKey, Vec<f64>>,
}

/// Sink that records everything in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    recorded: Mutex<Recorded>,
}

impl RecordingSink {
    /// Create an empty recording sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of every counter series named `name` whose labels include `labels`
    pub fn counter(&self, name: &str, labels: &[Label<'_>]) -> u64 {
        let recorded = self.lock();
        recorded
            .counters
            .iter()
            .filter(|(key, _)| matches(key, name, labels))
            .map(|(_, value)| *value)
            .sum()
    }

    /// Last value of the first gauge series named `name` whose labels include `labels`
    pub fn gauge(&self, name: &str, labels: &[Label<'_>]) -> Option<f64> {
        let recorded = self.lock();
        recorded
            .gauges
            .iter()
            .find(|(key, _)| matches(key, name, labels))
            .map(|(_, value)| *value)
    }

    /// All observations for histogram series matching `labels`
    pub fn histogram(&self, name: &str, labels: &[Label<'_>]) -> Vec<f64> {
        let recorded = self.lock();
        recorded
            .histograms
            .iter()
            .filter(|(key, _)| matches(key, name, labels))
            .flat_map(|(_, values)| values.iter().copied())
            .collect()
    }

    /// Number of distinct counter series recorded under `name`
    pub fn counter_series(&self, name: &str) -> usize {
        self.lock().counters.keys().filter(|(n, _)| n == name).count()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        *self.lock() = Recorded::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetricsSink for RecordingSink {
    fn increment_counter(&self, name: &'static str, labels: &[Label<'_>], value: u64) {
        *self.lock().counters.entry(key(name, labels)).or_insert(0) += value;
    }

    fn set_gauge(&self, name: &'static str, labels: &[Label<'_>], value: f64) {
        self.lock().gauges.insert(key(name, labels), value);
    }

    fn observe_histogram(&self, name: &'static str, labels: &[Label<'_>], value: f64) {
        self.lock()
            .histograms
            .entry(key(name, labels))
            .or_default()
            .push(value);
    }
}

fn key(name: &str, labels: &[Label<'_>]) -> SeriesKey {
    let mut pairs: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    pairs.sort();
    (name.to_string(), pairs)
}

fn matches(key: &SeriesKey, name: &str, labels: &[Label<'_>]) -> bool {
    key.0 == name
        && labels
            .iter()
            .all(|(k, v)| key.1.iter().any(|(kk, vv)| kk == k && vv == v))
}
