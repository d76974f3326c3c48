use thiserror::Error;

/// Errors raised by the segment cache.
///
/// `Clone` so that a single load failure can be replayed to every caller
/// waiting on the same in-flight segment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Segment cache manager has been shut down")]
    ShutDown,
    #[error("Too many concurrent {what}; increase '{knob}'")]
    TooManyConcurrent { what: &'static str, knob: &'static str },
    #[error("Cache operation '{operation}' failed: {reason}")]
    CacheOperationFailed { operation: &'static str, reason: String },
    #[error("Segment load failed: {0}")]
    LoadFailed(String),
    #[error("Segment load cancelled")]
    Cancelled,
    #[error("Command panicked: {0}")]
    CommandPanicked(String),
    #[error("Incompatible segments: {0}")]
    IncompatibleSegments(String),
    #[error("Aggregator cannot be rolled up: {0}")]
    NotRollable(String),
    #[error("Invalid segment body: {0}")]
    InvalidBody(String),
    #[error("Unknown column: {0}")]
    UnknownColumn(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    pub(crate) fn store(operation: &'static str, err: anyhow::Error) -> Self {
        CacheError::CacheOperationFailed {
            operation,
            reason: format!("{:#}", err),
        }
    }
}
