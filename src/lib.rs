/*!
 * Bulwark - resilience guards and SLO error budgets
 *
 * Wraps calls to external dependencies in a rate limiter, bulkhead, circuit
 * breaker and retry loop, records every call as an SLI outcome, and turns the
 * aggregates into error budgets, burn-rate alerts and compliance verdicts.
 *
 * The primitives live in `bulwark-core-resilience`, the SLI/SLO logic in
 * `bulwark-core-sli` and the metrics sinks in `bulwark-observability`. This
 * crate composes them and adds configuration, logging and the CLI.
 */

pub mod catalog;
pub mod config;
pub mod error;
pub mod guard;
pub mod logging;
pub mod output;
pub mod snapshot;

// Re-export commonly used types
pub use catalog::{ErrorCatalog, ErrorDefinition};
pub use config::{BulwarkConfig, ConfigError, ConfigOrigin, DependencyConfig};
pub use error::{BulwarkError, Result};
pub use guard::{DependencyGuard, GuardRegistry};

pub use bulwark_core_resilience as resilience;
pub use bulwark_core_sli as sli;
pub use bulwark_observability as observability;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
