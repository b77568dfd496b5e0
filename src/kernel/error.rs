use std::path::PathBuf;
use thiserror::Error;

/// Rejected configuration. Fatal to the instance being constructed, never
/// to anything already running.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("ring buffer capacity must be greater than zero")]
    ZeroCapacity,

    #[error("batch interval must be greater than zero")]
    ZeroBatchInterval,

    #[error("max batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("viewport size must be greater than zero")]
    ZeroViewport,

    #[error("max retained must be greater than zero")]
    ZeroRetention,

    #[error("target fps must be a positive finite number, got {0}")]
    InvalidTargetFps(f64),

    #[error("budget bounds are inverted: min {min} > max {max}")]
    InvertedBudget { min: usize, max: usize },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// A message that failed validation at the ingestion boundary. It never
/// reaches the ring buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("message id is empty")]
    EmptyId,

    #[error("message {id} content is {len} bytes, limit is {limit}")]
    ContentTooLarge { id: String, len: usize, limit: usize },
}
