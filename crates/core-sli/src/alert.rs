//! Multi-window burn-rate alerting
//!
//! Three independent checks, any combination of which may fire:
//! fast burn over the fast window (critical), slow burn over the slow window
//! (warning) and low remaining budget over the full budget window (warning).
//! Evaluation only returns alerts; delivering them is the caller's job.

use crate::budget::{Budget, ErrorBudgetCalculator};
use crate::duration::{format_window, serde_secs};
use crate::error::SliError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Remaining-budget percentage below which the low budget alert fires
pub const LOW_BUDGET_PERCENT: f64 = 10.0;

pub const FAST_BURN_ACTION: &str =
    "Page on-call. Stop deployments immediately. Investigate error spike.";
pub const SLOW_BURN_ACTION: &str = "Alert team. Review recent deployments. Monitor closely.";
pub const LOW_BUDGET_ACTION: &str =
    "Freeze non-critical deployments. Focus on reliability improvements.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Critical => "CRITICAL",
        })
    }
}

/// Which check produced an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FastBurn,
    SlowBurn,
    LowBudget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    /// Failures per hour in the alert's window
    pub burn_rate: f64,
    #[serde(with = "serde_secs")]
    pub window: Duration,
    /// Percentage the check compared against
    pub threshold: f64,
    pub recommended_action: String,
    pub timestamp: DateTime<Utc>,
}

fn format_exhaustion(budget: &Budget) -> String {
    match budget.time_to_exhaustion {
        Some(d) if d.is_zero() => "0s".to_string(),
        Some(d) => format_window(d),
        None => "never".to_string(),
    }
}

/// Evaluates the burn-rate policy of an [`ErrorBudgetCalculator`]'s config
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    calculator: ErrorBudgetCalculator,
}

impl AlertEvaluator {
    pub fn new(calculator: ErrorBudgetCalculator) -> Self {
        Self { calculator }
    }

    pub fn calculator(&self) -> &ErrorBudgetCalculator {
        &self.calculator
    }

    /// Every alert that currently applies, critical ones first
    pub fn should_alert(&self) -> Result<Vec<Alert>, SliError> {
        let config = self.calculator.config();
        let now = Utc::now();
        let mut alerts = Vec::new();

        let fast = self.calculator.calculate_budget(config.fast_burn_window)?;
        let consumed = fast.consumed_percent();
        if consumed >= config.fast_burn_percent {
            alerts.push(Alert {
                kind: AlertKind::FastBurn,
                severity: AlertSeverity::Critical,
                title: "Fast Error Budget Burn Detected".to_string(),
                description: format!(
                    "CRITICAL: Fast burn detected! {:.1}% of error budget consumed in {}. \
                     At current rate ({:.1} errors/hour), budget will exhaust in {}.",
                    consumed,
                    format_window(config.fast_burn_window),
                    fast.current_burn_rate,
                    format_exhaustion(&fast),
                ),
                burn_rate: fast.current_burn_rate,
                window: config.fast_burn_window,
                threshold: config.fast_burn_percent,
                recommended_action: FAST_BURN_ACTION.to_string(),
                timestamp: now,
            });
        }

        let slow = self.calculator.calculate_budget(config.slow_burn_window)?;
        let consumed = slow.consumed_percent();
        if consumed >= config.slow_burn_percent {
            alerts.push(Alert {
                kind: AlertKind::SlowBurn,
                severity: AlertSeverity::Warning,
                title: "Slow Error Budget Burn Detected".to_string(),
                description: format!(
                    "WARNING: Slow burn detected. {:.1}% of error budget consumed in {}. \
                     At current rate ({:.1} errors/hour), budget will exhaust in {}.",
                    consumed,
                    format_window(config.slow_burn_window),
                    slow.current_burn_rate,
                    format_exhaustion(&slow),
                ),
                burn_rate: slow.current_burn_rate,
                window: config.slow_burn_window,
                threshold: config.slow_burn_percent,
                recommended_action: SLOW_BURN_ACTION.to_string(),
                timestamp: now,
            });
        }

        let overall = self.calculator.calculate_budget(config.error_budget_window)?;
        if overall.budget_percent < LOW_BUDGET_PERCENT {
            alerts.push(Alert {
                kind: AlertKind::LowBudget,
                severity: AlertSeverity::Warning,
                title: "Error Budget Low".to_string(),
                description: format!(
                    "WARNING: Error budget low. Only {:.1}% remaining in {} window. \
                     Consider freezing non-critical deployments.",
                    overall.budget_percent,
                    format_window(config.error_budget_window),
                ),
                burn_rate: overall.current_burn_rate,
                window: config.error_budget_window,
                threshold: LOW_BUDGET_PERCENT,
                recommended_action: LOW_BUDGET_ACTION.to_string(),
                timestamp: now,
            });
        }

        for alert in &alerts {
            warn!(
                service = %config.service_name,
                severity = %alert.severity,
                window = %format_window(alert.window),
                burn_rate = alert.burn_rate,
                "{}",
                alert.title
            );
        }

        Ok(alerts)
    }
}
