//! Bulwark Observability: injectable metrics sinks
//!
//! Resilience primitives and SLI trackers report counters, gauges and
//! histograms through the [`MetricsSink`] trait. The sink is passed into each
//! component's constructor, so there is no process-wide registry and unit
//! tests stay isolated from each other.
//!
//! ## Sinks
//!
//! - [`PrometheusSink`]: owns a `prometheus::Registry`, renders the text
//!   exposition format for scraping
//! - [`RecordingSink`]: in-memory, with lookup helpers for assertions
//! - [`NoopSink`]: drops everything
//!
//! ## Example
//!
//! ```
//! use bulwark_observability::{names, MetricsSink, PrometheusSink};
//!
//! let sink = PrometheusSink::new();
//! sink.inc(names::RATE_LIMIT_ALLOWED_TOTAL, &[("name", "payments")]);
//!
//! let text = sink.encode_text().unwrap();
//! assert!(text.contains("rate_limit_allowed_total"));
//! ```

pub mod error;
pub mod names;
pub mod prometheus_sink;
pub mod sink;
pub mod testing;

pub use error::SinkError;
pub use prometheus_sink::PrometheusSink;
pub use sink::{noop, Label, MetricsSink, NoopSink, SharedSink};
pub use testing::RecordingSink;
