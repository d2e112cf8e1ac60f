//! Error budget arithmetic
//!
//! For an availability target `t` over `n` requests the budget is
//! `floor(n * (1 - t))` failed requests. Burn rate is failures per hour of
//! the queried window.

use crate::config::SloConfig;
use crate::duration::serde_secs;
use crate::error::SliError;
use crate::tracker::{MetricsSnapshot, MetricsSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const SECS_PER_HOUR: f64 = 3600.0;

/// Error budget state for one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Budget {
    pub slo_target: f64,
    #[serde(with = "serde_secs")]
    pub window: Duration,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_requests: u64,
    pub allowed_errors: i64,
    pub actual_errors: i64,
    /// Failures charged against the budget
    pub consumed_budget: i64,
    /// Negative once the budget is overspent
    pub remaining_budget: i64,
    /// Percent of the budget left; 100 when no errors are allowed
    pub budget_percent: f64,
    /// Failures per hour
    pub current_burn_rate: f64,
    /// Zero when exhausted, `None` when nothing is burning
    #[serde(with = "serde_secs::option")]
    pub time_to_exhaustion: Option<Duration>,
}

impl Budget {
    /// Compute the budget for `snapshot` against `slo_target` over `window`
    pub fn compute(snapshot: &MetricsSnapshot, slo_target: f64, window: Duration) -> Self {
        let total_requests = snapshot.total_requests;
        let allowed_errors = allowed_errors(total_requests, slo_target);
        let actual_errors = i64::try_from(snapshot.failed_requests).unwrap_or(i64::MAX);
        let remaining_budget = allowed_errors.saturating_sub(actual_errors);

        let budget_percent = if allowed_errors > 0 {
            remaining_budget as f64 / allowed_errors as f64 * 100.0
        } else {
            100.0
        };

        let mut window_hours = window.as_secs_f64() / SECS_PER_HOUR;
        if window_hours == 0.0 {
            window_hours = 1.0;
        }
        let current_burn_rate = actual_errors as f64 / window_hours;

        let time_to_exhaustion = if remaining_budget <= 0 {
            Some(Duration::ZERO)
        } else if current_burn_rate > 0.0 {
            Duration::try_from_secs_f64(remaining_budget as f64 / current_burn_rate * SECS_PER_HOUR)
                .ok()
        } else {
            None
        };

        Self {
            slo_target,
            window,
            window_start: snapshot.window_start,
            window_end: snapshot.window_end,
            total_requests,
            allowed_errors,
            actual_errors,
            consumed_budget: actual_errors,
            remaining_budget,
            budget_percent,
            current_burn_rate,
            time_to_exhaustion,
        }
    }

    /// Percent of the budget already spent
    pub fn consumed_percent(&self) -> f64 {
        100.0 - self.budget_percent
    }

    pub fn is_exhausted(&self) -> bool {
        (self.allowed_errors > 0 && self.remaining_budget <= 0)
            || (self.allowed_errors == 0 && self.actual_errors > 0)
    }
}

/// `floor(total * (1 - target))`, rounded to 1e-6 first so that float noise
/// in `1 - target` (0.1 becoming 0.09999999999999998) does not drop a request
fn allowed_errors(total_requests: u64, slo_target: f64) -> i64 {
    let exact = total_requests as f64 * (1.0 - slo_target);
    let allowed = ((exact * 1e6).round() / 1e6).floor();
    if allowed <= 0.0 {
        0
    } else if allowed >= i64::MAX as f64 {
        i64::MAX
    } else {
        allowed as i64
    }
}

/// Computes budgets from a metrics source and an SLO configuration
#[derive(Clone)]
pub struct ErrorBudgetCalculator {
    source: Arc<dyn MetricsSource>,
    config: Arc<SloConfig>,
}

impl std::fmt::Debug for ErrorBudgetCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorBudgetCalculator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ErrorBudgetCalculator {
    pub fn new(source: Arc<dyn MetricsSource>, config: Arc<SloConfig>) -> Result<Self, SliError> {
        config.validate()?;
        Ok(Self { source, config })
    }

    pub fn config(&self) -> &SloConfig {
        &self.config
    }

    pub(crate) fn source(&self) -> &Arc<dyn MetricsSource> {
        &self.source
    }

    pub fn calculate_budget(&self, window: Duration) -> Result<Budget, SliError> {
        let snapshot = self.source.snapshot(window)?;
        Ok(Budget::compute(
            &snapshot,
            self.config.availability_target,
            window,
        ))
    }

    /// Failures per hour over `window`
    pub fn get_burn_rate(&self, window: Duration) -> Result<f64, SliError> {
        Ok(self.calculate_budget(window)?.current_burn_rate)
    }
}
