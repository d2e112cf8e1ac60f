/*!
 * Error types for Bulwark
 */

use bulwark_core_resilience::ResilienceError;
use bulwark_core_sli::SliError;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, BulwarkError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CRITICAL: i32 = 2;

#[derive(Debug, Error)]
pub enum BulwarkError {
    /// Configuration could not be loaded or failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A guarded call failed or was rejected
    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    /// SLI aggregation or SLO evaluation failed
    #[error(transparent)]
    Sli(#[from] SliError),

    /// No guard registered under this dependency name
    #[error("no guard registered for dependency '{0}'")]
    UnknownDependency(String),

    /// A metrics snapshot file could not be read or parsed
    #[error("failed to load snapshot {}: {reason}", path.display())]
    Snapshot { path: PathBuf, reason: String },

    /// Logging could not be initialized
    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl BulwarkError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BulwarkError::Config(_) | BulwarkError::Logging(_) => EXIT_CRITICAL,
            _ => EXIT_FAILURE,
        }
    }

    /// The resilience error behind this one, if any
    pub fn as_resilience(&self) -> Option<&ResilienceError> {
        match self {
            BulwarkError::Resilience(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let config = BulwarkError::Config(ConfigError::Validation(vec!["bad".to_string()]));
        assert_eq!(config.exit_code(), EXIT_CRITICAL);

        let rejected = BulwarkError::from(ResilienceError::CircuitOpen {
            name: "db".to_string(),
        });
        assert_eq!(rejected.exit_code(), EXIT_FAILURE);
        assert!(rejected.as_resilience().is_some_and(|e| e.is_rejection()));
    }

    #[test]
    fn test_display_is_transparent() {
        let err = BulwarkError::from(ResilienceError::RateLimitExceeded {
            name: "payments".to_string(),
        });
        assert_eq!(err.to_string(), "rate limit exceeded for 'payments'");
        assert_eq!(
            BulwarkError::UnknownDependency("x".into()).to_string(),
            "no guard registered for dependency 'x'"
        );
    }
}
