//! Per-call request outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Operation name used when the caller supplies none
pub const DEFAULT_OPERATION: &str = "default";

/// How badly a failure affects users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl ErrorSeverity {
    /// Every severity, most severe first
    pub const ALL: [ErrorSeverity; 5] = [
        ErrorSeverity::Critical,
        ErrorSeverity::High,
        ErrorSeverity::Medium,
        ErrorSeverity::Low,
        ErrorSeverity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Critical => "CRITICAL",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Info => "INFO",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(ErrorSeverity::Critical),
            "HIGH" => Ok(ErrorSeverity::High),
            "MEDIUM" => Ok(ErrorSeverity::Medium),
            "LOW" => Ok(ErrorSeverity::Low),
            "INFO" => Ok(ErrorSeverity::Info),
            other => Err(format!("unknown error severity: {other}")),
        }
    }
}

/// Result of one guarded call, consumed by the SLI tracker
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub operation: String,
    pub success: bool,
    pub latency: Duration,
    pub error_code: Option<String>,
    pub error_severity: Option<ErrorSeverity>,
    pub timestamp: DateTime<Utc>,
}

impl RequestOutcome {
    pub fn success(operation: impl Into<String>, latency: Duration) -> Self {
        Self {
            operation: operation.into(),
            success: true,
            latency,
            error_code: None,
            error_severity: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        operation: impl Into<String>,
        latency: Duration,
        error_code: impl Into<String>,
        severity: ErrorSeverity,
    ) -> Self {
        Self {
            operation: operation.into(),
            success: false,
            latency,
            error_code: Some(error_code.into()),
            error_severity: Some(severity),
            timestamp: Utc::now(),
        }
    }

    /// Operation name with the empty string mapped to [`DEFAULT_OPERATION`]
    pub fn operation_name(&self) -> &str {
        if self.operation.is_empty() {
            DEFAULT_OPERATION
        } else {
            &self.operation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_round_trips_through_str() {
        for severity in [
            ErrorSeverity::Critical,
            ErrorSeverity::High,
            ErrorSeverity::Medium,
            ErrorSeverity::Low,
            ErrorSeverity::Info,
        ] {
            assert_eq!(severity.as_str().parse::<ErrorSeverity>(), Ok(severity));
        }
        assert_eq!("high".parse::<ErrorSeverity>(), Ok(ErrorSeverity::High));
        assert!("fatal".parse::<ErrorSeverity>().is_err());
    }

    #[test]
    fn test_severity_serializes_uppercase() {
        let json = serde_json::to_string(&ErrorSeverity::Medium).unwrap();
        assert_eq!(json, "\"MEDIUM\"");
    }

    #[test]
    fn test_empty_operation_maps_to_default() {
        let outcome = RequestOutcome::success("", Duration::from_millis(5));
        assert_eq!(outcome.operation_name(), "default");

        let outcome = RequestOutcome::failure(
            "charge",
            Duration::from_millis(5),
            "TIMEOUT",
            ErrorSeverity::High,
        );
        assert_eq!(outcome.operation_name(), "charge");
        assert_eq!(outcome.error_code.as_deref(), Some("TIMEOUT"));
    }
}
