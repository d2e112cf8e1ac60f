//! Human-readable and JSON rendering for CLI results

use bulwark_core_sli::{format_window, Alert, AlertSeverity, Budget, OverallCompliance};
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use std::time::Duration;

use crate::config::{BulwarkConfig, ConfigOrigin};

/// Output mode for CLI results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn new(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }

    /// Pretty JSON in JSON mode, otherwise the table built by `human`
    pub fn render<T, H>(&self, value: &T, human: H) -> serde_json::Result<String>
    where
        T: Serialize,
        H: FnOnce(&T) -> Table,
    {
        match self {
            OutputMode::Json => serde_json::to_string_pretty(value),
            OutputMode::Human => Ok(human(value).to_string()),
        }
    }
}

/// One-word verdict for the remaining budget percentage
pub fn budget_status(budget_percent: f64) -> &'static str {
    if budget_percent >= 50.0 {
        "healthy"
    } else if budget_percent >= 25.0 {
        "warning"
    } else if budget_percent >= 10.0 {
        "critical"
    } else {
        "exhausted"
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).fg(Color::Cyan).add_attribute(Attribute::Bold))
        .collect()
}

fn format_optional_window(window: Option<Duration>) -> String {
    match window {
        Some(d) if d.is_zero() => "now".to_string(),
        Some(d) => format_window(d),
        None => "never".to_string(),
    }
}

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Create a key-value table
pub fn stats_table(items: &[(&str, String)]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_NO_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for (key, value) in items {
        table.add_row(vec![
            Cell::new(key).fg(Color::Cyan),
            Cell::new(value).add_attribute(Attribute::Bold),
        ]);
    }

    table
}

pub fn budget_table(budget: &Budget) -> Table {
    let status_color = if budget.is_exhausted() {
        Color::Red
    } else if budget.budget_percent < 25.0 {
        Color::Yellow
    } else {
        Color::Green
    };

    let mut table = stats_table(&[
        ("Window", format_window(budget.window)),
        ("SLO target", format!("{:.3}%", budget.slo_target * 100.0)),
        ("Requests", budget.total_requests.to_string()),
        ("Allowed errors", budget.allowed_errors.to_string()),
        ("Actual errors", budget.actual_errors.to_string()),
        ("Remaining", budget.remaining_budget.to_string()),
        ("Burn rate", format!("{:.2} errors/hour", budget.current_burn_rate)),
        (
            "Exhausted in",
            format_optional_window(budget.time_to_exhaustion),
        ),
    ]);
    table.add_row(vec![
        Cell::new("Budget left").fg(Color::Cyan),
        Cell::new(format!(
            "{:.1}% ({})",
            budget.budget_percent,
            budget_status(budget.budget_percent)
        ))
        .fg(status_color)
        .add_attribute(Attribute::Bold),
    ]);
    table
}

pub fn alerts_table(alerts: &[Alert]) -> Table {
    let mut table = create_table();
    table.set_header(header(&["Severity", "Alert", "Window", "Burn rate", "Action"]));

    for alert in alerts {
        let color = match alert.severity {
            AlertSeverity::Critical => Color::Red,
            AlertSeverity::Warning => Color::Yellow,
        };
        table.add_row(vec![
            Cell::new(alert.severity)
                .fg(color)
                .add_attribute(Attribute::Bold),
            Cell::new(format!("{}\n{}", alert.title, alert.description)),
            Cell::new(format_window(alert.window)),
            Cell::new(format!("{:.2}/h", alert.burn_rate)),
            Cell::new(&alert.recommended_action),
        ]);
    }

    table
}

pub fn compliance_table(overall: &OverallCompliance) -> Table {
    let mut table = create_table();
    table.set_header(header(&["SLI", "Target", "Actual", "Margin", "Status"]));

    for c in &overall.compliances {
        let status = if c.in_compliance {
            Cell::new("met").fg(Color::Green)
        } else {
            Cell::new("violated").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&c.sli),
            Cell::new(format!("{}", c.target)),
            Cell::new(format!("{:.4}", c.actual)),
            Cell::new(format!("{:+.4}", c.margin)),
            status,
        ]);
    }

    table.add_row(vec![
        Cell::new("health").add_attribute(Attribute::Bold),
        Cell::new(""),
        Cell::new(format!("{:.1}% budget", overall.budget.budget_percent)),
        Cell::new(""),
        Cell::new(overall.health).add_attribute(Attribute::Bold),
    ]);
    table
}

pub fn config_table(config: &BulwarkConfig, origin: &ConfigOrigin) -> Table {
    let slo = config.slo_config();
    let mut items = vec![
        ("Source", origin.to_string()),
        ("Service", config.service_name.clone()),
        (
            "Availability",
            format!("{:.3}%", slo.availability_target * 100.0),
        ),
        (
            "Latency",
            match slo.latency_p99_ms {
                Some(p99) => format!("p95 {} ms, p99 {} ms", slo.latency_p95_ms, p99),
                None => format!("p95 {} ms", slo.latency_p95_ms),
            },
        ),
        ("Max error rate", format!("{}%", slo.max_error_rate * 100.0)),
        ("Budget window", format_window(slo.error_budget_window)),
        (
            "Fast burn",
            format!(
                "{}% in {}",
                slo.fast_burn_percent,
                format_window(slo.fast_burn_window)
            ),
        ),
        (
            "Slow burn",
            format!(
                "{}% in {}",
                slo.slow_burn_percent,
                format_window(slo.slow_burn_window)
            ),
        ),
    ];

    for dep in &config.dependencies {
        let mut stages = Vec::new();
        if dep.rate_limit.is_some() {
            stages.push("rate_limit");
        }
        if dep.bulkhead.is_some() {
            stages.push("bulkhead");
        }
        if dep.breaker.is_some() {
            stages.push("breaker");
        }
        if dep.retry.is_some() {
            stages.push("retry");
        }
        let stages = if stages.is_empty() {
            "unguarded".to_string()
        } else {
            stages.join(" > ")
        };
        items.push(("Dependency", format!("{}: {}", dep.name, stages)));
    }

    stats_table(&items)
}
