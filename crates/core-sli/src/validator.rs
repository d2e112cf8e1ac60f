//! SLO compliance checks

use crate::budget::{Budget, ErrorBudgetCalculator};
use crate::duration::serde_secs;
use crate::error::SliError;
use crate::tracker::MetricsSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// One SLI measured against its target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Compliance {
    pub sli: String,
    pub target: f64,
    pub actual: f64,
    pub in_compliance: bool,
    /// Positive when inside the target, negative on violation
    pub margin: f64,
    #[serde(with = "serde_secs")]
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Healthy,
    AtRisk,
    Critical,
}

impl Health {
    pub fn recommended_action(&self) -> &'static str {
        match self {
            Health::Healthy => "No action required. Continue normal deployments.",
            Health::AtRisk => {
                "Review failing SLIs. Slow down risky deployments until compliance recovers."
            }
            Health::Critical => "Error budget exhausted. Freeze deployments and restore reliability.",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Health::Healthy => "HEALTHY",
            Health::AtRisk => "AT_RISK",
            Health::Critical => "CRITICAL",
        })
    }
}

/// Compliance across every SLI plus the budget for the same window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallCompliance {
    pub service_name: String,
    pub all_met: bool,
    pub compliances: Vec<Compliance>,
    pub budget: Budget,
    pub health: Health,
    pub recommended_action: String,
    pub timestamp: DateTime<Utc>,
}

/// Checks availability, latency and error rate against [`SloConfig`](crate::SloConfig)
#[derive(Debug, Clone)]
pub struct SloValidator {
    calculator: ErrorBudgetCalculator,
}

impl SloValidator {
    pub fn new(calculator: ErrorBudgetCalculator) -> Self {
        Self { calculator }
    }

    fn snapshot(&self, window: Duration) -> Result<MetricsSnapshot, SliError> {
        self.calculator.source().snapshot(window)
    }

    /// Availability as a fraction against `availability_target`
    pub fn validate_availability(&self, window: Duration) -> Result<Compliance, SliError> {
        Ok(self.availability(&self.snapshot(window)?, window))
    }

    /// p95 against `latency_p95_ms`; p99 also has to hold when configured
    pub fn validate_latency(&self, window: Duration) -> Result<Compliance, SliError> {
        Ok(self.latency(&self.snapshot(window)?, window))
    }

    /// Error rate as a fraction against `max_error_rate`
    pub fn validate_error_rate(&self, window: Duration) -> Result<Compliance, SliError> {
        Ok(self.error_rate(&self.snapshot(window)?, window))
    }

    /// Results keyed `availability`, `latency` and `error_rate`
    pub fn compliance(&self, window: Duration) -> Result<BTreeMap<String, Compliance>, SliError> {
        let snapshot = self.snapshot(window)?;
        Ok(BTreeMap::from([
            (
                "availability".to_string(),
                self.availability(&snapshot, window),
            ),
            ("latency".to_string(), self.latency(&snapshot, window)),
            ("error_rate".to_string(), self.error_rate(&snapshot, window)),
        ]))
    }

    /// Roll every SLI and the budget up into a health verdict
    ///
    /// Critical when the budget is spent, at risk when an SLI misses or less
    /// than 10% of the budget is left, healthy otherwise.
    pub fn overall(&self, window: Duration) -> Result<OverallCompliance, SliError> {
        let snapshot = self.snapshot(window)?;
        let compliances = vec![
            self.availability(&snapshot, window),
            self.latency(&snapshot, window),
            self.error_rate(&snapshot, window),
        ];
        let all_met = compliances.iter().all(|c| c.in_compliance);
        let budget = Budget::compute(
            &snapshot,
            self.calculator.config().availability_target,
            window,
        );

        let health = if budget.is_exhausted() {
            Health::Critical
        } else if !all_met || budget.budget_percent < crate::alert::LOW_BUDGET_PERCENT {
            Health::AtRisk
        } else {
            Health::Healthy
        };

        Ok(OverallCompliance {
            service_name: self.calculator.config().service_name.clone(),
            all_met,
            compliances,
            budget,
            health,
            recommended_action: health.recommended_action().to_string(),
            timestamp: Utc::now(),
        })
    }

    fn availability(&self, snapshot: &MetricsSnapshot, window: Duration) -> Compliance {
        let target = self.calculator.config().availability_target;
        let actual = snapshot.availability / 100.0;
        Compliance {
            sli: "availability".to_string(),
            target,
            actual,
            in_compliance: actual >= target,
            margin: actual - target,
            window,
        }
    }

    fn latency(&self, snapshot: &MetricsSnapshot, window: Duration) -> Compliance {
        let config = self.calculator.config();
        let target = config.latency_p95_ms as f64;
        let actual = snapshot.latency_p95_ms;
        let p99_ok = config
            .latency_p99_ms
            .map_or(true, |p99| snapshot.latency_p99_ms <= p99 as f64);
        Compliance {
            sli: "latency_p95".to_string(),
            target,
            actual,
            in_compliance: actual <= target && p99_ok,
            margin: target - actual,
            window,
        }
    }

    fn error_rate(&self, snapshot: &MetricsSnapshot, window: Duration) -> Compliance {
        let target = self.calculator.config().max_error_rate;
        let actual = snapshot.error_rate_percent / 100.0;
        Compliance {
            sli: "error_rate".to_string(),
            target,
            actual,
            in_compliance: actual <= target,
            margin: target - actual,
            window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SloConfig;
    use crate::tracker::{MetricsSource, StaticSource};
    use std::sync::Arc;

    const DAY: Duration = Duration::from_secs(86_400);

    fn validator(snapshot: MetricsSnapshot) -> SloValidator {
        let source: Arc<dyn MetricsSource> = Arc::new(StaticSource::new(snapshot));
        let calculator =
            ErrorBudgetCalculator::new(source, Arc::new(SloConfig::default())).unwrap();
        SloValidator::new(calculator)
    }

    #[test]
    fn test_healthy_service() {
        let validator =
            validator(MetricsSnapshot::from_counts(100_000, 20).with_latencies(20.0, 150.0, 300.0));

        let overall = validator.overall(DAY).unwrap();
        assert!(overall.all_met);
        assert_eq!(overall.health, Health::Healthy);
        assert_eq!(overall.budget.allowed_errors, 100);
        assert_eq!(overall.compliances.len(), 3);
    }

    #[test]
    fn test_availability_violation() {
        let validator = validator(MetricsSnapshot::from_counts(1000, 5));

        let availability = validator.validate_availability(DAY).unwrap();
        assert!(!availability.in_compliance);
        assert!((availability.actual - 0.995).abs() < 1e-9);
        assert!(availability.margin < 0.0);

        let error_rate = validator.validate_error_rate(DAY).unwrap();
        assert!(!error_rate.in_compliance);
        assert!((error_rate.actual - 0.005).abs() < 1e-9);
    }

    #[test]
    fn test_p99_breach_fails_latency() {
        let validator =
            validator(MetricsSnapshot::from_counts(1000, 0).with_latencies(10.0, 150.0, 900.0));

        let latency = validator.validate_latency(DAY).unwrap();
        assert_eq!(latency.sli, "latency_p95");
        assert!(!latency.in_compliance);
        // Margin still reflects p95 only
        assert_eq!(latency.margin, 50.0);

        let overall = validator.overall(DAY).unwrap();
        assert!(!overall.all_met);
        assert_eq!(overall.health, Health::AtRisk);
    }

    #[test]
    fn test_exhausted_budget_is_critical() {
        let validator = validator(MetricsSnapshot::from_counts(100_000, 500));

        let overall = validator.overall(DAY).unwrap();
        assert_eq!(overall.health, Health::Critical);
        assert_eq!(
            overall.recommended_action,
            Health::Critical.recommended_action()
        );
    }

    #[test]
    fn test_compliance_map_keys() {
        let validator = validator(MetricsSnapshot::from_counts(10, 0));
        let keys: Vec<String> = validator.compliance(DAY).unwrap().into_keys().collect();
        assert_eq!(keys, vec!["availability", "error_rate", "latency"]);
    }

    #[test]
    fn test_health_serializes_screaming_case() {
        assert_eq!(serde_json::to_value(Health::AtRisk).unwrap(), "AT_RISK");
        assert_eq!(Health::AtRisk.to_string(), "AT_RISK");
    }
}
