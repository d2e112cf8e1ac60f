//! Error types for metrics sinks

use thiserror::Error;

/// Errors raised while building or rendering a sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// Registry rejected a metric (bad name, duplicate registration, ...)
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Text encoder produced invalid UTF-8
    #[error("metrics output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}
