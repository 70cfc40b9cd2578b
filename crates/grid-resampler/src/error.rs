//! Error types for the resampling engine.

use thiserror::Error;

use crate::time::YearMonth;

/// Errors that can occur while planning, fetching, indexing or resolving.
#[derive(Error, Debug)]
pub enum ResampleError {
    /// The parameter document is missing, malformed or fails validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// The grid provider never materialized the month's batch.
    #[error("grid provider failed for {month}: {reason}")]
    ProviderFailure { month: YearMonth, reason: String },

    /// Requested slots received no message (only raised under the `fail` gap policy).
    #[error("{count} indexing gap(s) in {month}")]
    IndexingGap { month: YearMonth, count: usize },

    /// A persisted month covers a different number of locations than the current plan.
    #[error("resume inconsistency for {month}: planned {expected} location(s), table recorded {recorded}")]
    ResumeInconsistency {
        month: YearMonth,
        expected: usize,
        recorded: usize,
    },

    /// A message or coordinate array does not match the batch grid shape.
    #[error("shape mismatch: expected {expected:?}, got {actual:?} ({context})")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
        context: String,
    },

    /// The tensor has no slot for a snapshot the resolver needs.
    #[error("no snapshot for day {day} hour {hour:02} in {month}")]
    MissingSnapshot { month: YearMonth, day: u32, hour: u32 },

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("invalid location ({lat}, {lon})")]
    InvalidLocation { lat: f64, lon: f64 },

    /// Result table persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResampleError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider failure for a month.
    pub fn provider(month: YearMonth, reason: impl Into<String>) -> Self {
        Self::ProviderFailure {
            month,
            reason: reason.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

impl From<sqlx::Error> for ResampleError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type for resampling operations.
pub type Result<T> = std::result::Result<T, ResampleError>;
