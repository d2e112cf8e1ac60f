//! SLO configuration value object

use crate::error::SliError;
use std::time::Duration;

/// Availability, latency and error-rate targets plus the error budget policy
///
/// Built once per service and shared read-only by the calculator, alert
/// evaluator and validator.
#[derive(Debug, Clone, PartialEq)]
pub struct SloConfig {
    pub service_name: String,
    /// Fraction of successful requests, e.g. `0.999` for 99.9%
    pub availability_target: f64,
    pub latency_p95_ms: u64,
    /// Checked in addition to p95 when set
    pub latency_p99_ms: Option<u64>,
    /// Maximum fraction of failed requests, in `[0, 1]`
    pub max_error_rate: f64,
    pub error_budget_window: Duration,
    pub fast_burn_window: Duration,
    /// Percent of budget consumed in the fast window that pages
    pub fast_burn_percent: f64,
    pub slow_burn_window: Duration,
    /// Percent of budget consumed in the slow window that warns
    pub slow_burn_percent: f64,
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            service_name: "default".to_string(),
            availability_target: 0.999,
            latency_p95_ms: 200,
            latency_p99_ms: Some(500),
            max_error_rate: 0.001,
            error_budget_window: Duration::from_secs(30 * 24 * 3600),
            fast_burn_window: Duration::from_secs(3600),
            fast_burn_percent: 2.0,
            slow_burn_window: Duration::from_secs(6 * 3600),
            slow_burn_percent: 5.0,
        }
    }
}

impl SloConfig {
    /// Default targets for the named service
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Every out-of-range setting, empty when the config is valid
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.service_name.trim().is_empty() {
            problems.push("service_name is required".to_string());
        }
        if !(self.availability_target > 0.0 && self.availability_target <= 1.0) {
            problems.push(format!(
                "availability_target must be in (0, 1], got {}",
                self.availability_target
            ));
        }
        if self.latency_p95_ms == 0 {
            problems.push("latency_p95_ms must be positive".to_string());
        }
        if let Some(p99) = self.latency_p99_ms {
            if p99 < self.latency_p95_ms {
                problems.push(format!(
                    "latency_p99_ms ({p99}) must not be below latency_p95_ms ({})",
                    self.latency_p95_ms
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            problems.push(format!(
                "max_error_rate must be in [0, 1], got {}",
                self.max_error_rate
            ));
        }
        for (field, window) in [
            ("error_budget_window", self.error_budget_window),
            ("fast_burn_window", self.fast_burn_window),
            ("slow_burn_window", self.slow_burn_window),
        ] {
            if window.is_zero() {
                problems.push(format!("{field} must be positive"));
            }
        }
        for (field, percent) in [
            ("fast_burn_percent", self.fast_burn_percent),
            ("slow_burn_percent", self.slow_burn_percent),
        ] {
            if !(percent > 0.0 && percent <= 100.0) {
                problems.push(format!("{field} must be in (0, 100], got {percent}"));
            }
        }

        problems
    }

    pub fn validate(&self) -> Result<(), SliError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(SliError::InvalidConfig(problems))
        }
    }
}
