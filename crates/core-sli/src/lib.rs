//! Bulwark Core SLI: service level indicators and error budgets
//!
//! Consumes the outcome of every guarded call and turns the aggregates into
//! reliability signals:
//!
//! - [`SliTracker`] counts requests, failures (by error code and severity),
//!   latency and throughput, and produces a [`MetricsSnapshot`]
//! - [`ErrorBudgetCalculator`] derives the allowed, spent and remaining error
//!   budget plus the burn rate for any window
//! - [`AlertEvaluator`] applies the fast burn, slow burn and low budget checks
//! - [`SloValidator`] checks availability, latency and error rate targets
//!
//! Budget, alert and compliance computations read snapshots through the
//! [`MetricsSource`] trait, so they work the same against a live tracker,
//! a fixed snapshot loaded from disk, or an empty source.
//!
//! ```
//! use bulwark_core_sli::{
//!     AlertEvaluator, ErrorBudgetCalculator, MetricsSnapshot, SloConfig, StaticSource,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let source = Arc::new(StaticSource::new(MetricsSnapshot::from_counts(1_000_000, 200)));
//! let calculator = ErrorBudgetCalculator::new(source, Arc::new(SloConfig::default())).unwrap();
//!
//! let budget = calculator.calculate_budget(Duration::from_secs(3600)).unwrap();
//! assert_eq!(budget.remaining_budget, 800);
//!
//! let alerts = AlertEvaluator::new(calculator).should_alert().unwrap();
//! assert_eq!(alerts.len(), 2);
//! ```

pub mod alert;
pub mod budget;
pub mod config;
pub mod duration;
pub mod error;
pub mod outcome;
pub mod tracker;
pub mod validator;

pub use alert::{Alert, AlertEvaluator, AlertKind, AlertSeverity};
pub use budget::{Budget, ErrorBudgetCalculator};
pub use config::SloConfig;
pub use duration::{format_window, parse_window};
pub use error::SliError;
pub use outcome::{ErrorSeverity, RequestOutcome, DEFAULT_OPERATION};
pub use tracker::{FailureCount, MetricsSnapshot, MetricsSource, NopSource, SliTracker, StaticSource};
pub use validator::{Compliance, Health, OverallCompliance, SloValidator};
