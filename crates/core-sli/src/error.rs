//! Error types for SLI tracking and SLO evaluation

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SliError {
    /// One or more SLO settings are out of range
    #[error("invalid SLO configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    /// A window string could not be parsed
    #[error("invalid window '{input}': {reason}")]
    InvalidWindow { input: String, reason: String },

    /// Snapshot counts contradict each other
    #[error("inconsistent snapshot: {0}")]
    InvalidSnapshot(String),

    /// The metrics source could not produce a snapshot
    #[error("metrics source unavailable: {0}")]
    SourceUnavailable(String),
}
