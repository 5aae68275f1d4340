//! Error types

use thiserror::Error;

/// Errors a single price source can return.
///
/// Always recoverable: a fan-out treats them as "no data from this source".
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("Source {0} unavailable")]
    Unavailable(String),

    #[error("Source {source_id} does not support {pair}")]
    PairUnsupported { source_id: String, pair: String },

    #[error("Malformed response from {source_id}: {message}")]
    MalformedResponse { source_id: String, message: String },
}

/// Durable store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to callers of the oracle
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Price source not found: {0}")]
    SourceNotFound(String),

    #[error("No source supports {0}")]
    NoSourceAvailable(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Validation failed for {source_id}: {}", messages.join("; "))]
    ValidationFailed {
        source_id: String,
        messages: Vec<String>,
    },

    #[error("Insufficient sources: {available} < {required}")]
    InsufficientSources { required: usize, available: usize },

    #[error("Confidence too low: {confidence:.3} < {threshold:.3}")]
    ConfidenceBelowThreshold { confidence: f64, threshold: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias
pub type SourceResult<T> = Result<T, SourceError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type OracleResult<T> = Result<T, OracleError>;
