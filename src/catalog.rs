//! Registry of known error codes and their severities
//!
//! Codes are registered explicitly at startup. The guard consults the catalog
//! to label every failed request; codes nobody registered count as
//! [`ErrorSeverity::Medium`].

use bulwark_core_resilience::ResilienceError;
use bulwark_core_sli::ErrorSeverity;
use serde::Serialize;
use std::collections::HashMap;

/// Severity assigned to codes missing from the catalog
pub const UNKNOWN_SEVERITY: ErrorSeverity = ErrorSeverity::Medium;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDefinition {
    pub code: String,
    pub severity: ErrorSeverity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

impl ErrorDefinition {
    pub fn new(
        code: impl Into<String>,
        severity: ErrorSeverity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            severity,
            description: description.into(),
            mitigation: None,
        }
    }

    pub fn with_mitigation(mut self, mitigation: impl Into<String>) -> Self {
        self.mitigation = Some(mitigation.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorCatalog {
    definitions: HashMap<String, ErrorDefinition>,
}

impl ErrorCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-loaded with the codes the guard itself produces
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog
            .register(
                ErrorDefinition::new(
                    "CIRCUIT_OPEN",
                    ErrorSeverity::High,
                    "Circuit breaker rejected the call",
                )
                .with_mitigation("Check the health of the dependency behind the breaker"),
            )
            .register(
                ErrorDefinition::new(
                    "RATE_LIMITED",
                    ErrorSeverity::Medium,
                    "Rate limiter had no token available",
                )
                .with_mitigation("Raise the limit or shed load upstream"),
            )
            .register(
                ErrorDefinition::new(
                    "BULKHEAD_TIMEOUT",
                    ErrorSeverity::Medium,
                    "No concurrency slot freed up in time",
                )
                .with_mitigation("Raise max_concurrency or investigate slow calls"),
            )
            .register(ErrorDefinition::new(
                "RETRY_EXHAUSTED",
                ErrorSeverity::High,
                "Every retry attempt failed",
            ))
            .register(ErrorDefinition::new(
                "CANCELLED",
                ErrorSeverity::Info,
                "Caller cancelled the call",
            ))
            .register(ErrorDefinition::new(
                "TRANSIENT",
                ErrorSeverity::Medium,
                "Transient dependency failure",
            ))
            .register(ErrorDefinition::new(
                "PERMANENT",
                ErrorSeverity::High,
                "Permanent dependency failure",
            ))
            .register(ErrorDefinition::new(
                "OPERATION_FAILED",
                ErrorSeverity::Medium,
                "Dependency call failed",
            ));
        catalog
    }

    /// Add or replace the definition for `definition.code`
    pub fn register(&mut self, definition: ErrorDefinition) -> &mut Self {
        self.definitions.insert(definition.code.clone(), definition);
        self
    }

    pub fn get(&self, code: &str) -> Option<&ErrorDefinition> {
        self.definitions.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.definitions.contains_key(code)
    }

    pub fn severity(&self, code: &str) -> ErrorSeverity {
        self.get(code).map_or(UNKNOWN_SEVERITY, |d| d.severity)
    }

    pub fn description(&self, code: &str) -> String {
        self.get(code)
            .map_or_else(|| format!("Unknown error: {code}"), |d| d.description.clone())
    }

    /// Code and severity to record for a failed call
    ///
    /// Exhausted retries are labelled with the last attempt's code, so a
    /// coded operation failure keeps its code after the retry loop gives up.
    pub fn classify(&self, err: &ResilienceError) -> (String, ErrorSeverity) {
        let code = err.root().error_code();
        (code.to_string(), self.severity(code))
    }

    /// Definitions sorted by code
    pub fn definitions(&self) -> Vec<&ErrorDefinition> {
        let mut defs: Vec<_> = self.definitions.values().collect();
        defs.sort_by(|a, b| a.code.cmp(&b.code));
        defs
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_code_is_medium() {
        let catalog = ErrorCatalog::new();
        assert!(catalog.is_empty());
        assert_eq!(catalog.severity("DB-042"), ErrorSeverity::Medium);
        assert_eq!(catalog.description("DB-042"), "Unknown error: DB-042");
    }

    #[test]
    fn test_register_replaces_existing_code() {
        let mut catalog = ErrorCatalog::new();
        catalog.register(ErrorDefinition::new("DB-001", ErrorSeverity::Low, "slow query"));
        catalog.register(
            ErrorDefinition::new("DB-001", ErrorSeverity::Critical, "primary down")
                .with_mitigation("fail over"),
        );

        assert_eq!(catalog.len(), 1);
        let def = catalog.get("DB-001").unwrap();
        assert_eq!(def.severity, ErrorSeverity::Critical);
        assert_eq!(def.mitigation.as_deref(), Some("fail over"));
    }

    #[test]
    fn test_classify_uses_root_code() {
        let mut catalog = ErrorCatalog::with_builtin();
        catalog.register(ErrorDefinition::new(
            "PAY-003",
            ErrorSeverity::Critical,
            "card processor unreachable",
        ));

        let exhausted = ResilienceError::RetryExhausted {
            attempts: 3,
            source: Box::new(ResilienceError::coded(
                "PAY-003",
                std::io::Error::other("connection refused"),
            )),
        };
        assert_eq!(
            catalog.classify(&exhausted),
            ("PAY-003".to_string(), ErrorSeverity::Critical)
        );

        let open = ResilienceError::CircuitOpen {
            name: "payments".to_string(),
        };
        assert_eq!(
            catalog.classify(&open),
            ("CIRCUIT_OPEN".to_string(), ErrorSeverity::High)
        );
    }

    #[test]
    fn test_builtin_covers_guard_codes() {
        let catalog = ErrorCatalog::with_builtin();
        for code in [
            "CIRCUIT_OPEN",
            "RATE_LIMITED",
            "BULKHEAD_TIMEOUT",
            "RETRY_EXHAUSTED",
            "CANCELLED",
            "TRANSIENT",
            "PERMANENT",
            "OPERATION_FAILED",
        ] {
            assert!(catalog.contains(code), "missing {code}");
        }
        let codes: Vec<&str> = catalog
            .definitions()
            .iter()
            .map(|d| d.code.as_str())
            .collect();
        assert_eq!(codes.first(), Some(&"BULKHEAD_TIMEOUT"));
    }
}
