//! Error types for the line engine.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! [`LineEngineError`]. The variants follow the allocation taxonomy: callers
//! are expected to match on `CapacityExceeded`, `SegmentMismatch` and
//! `TransactionTimeout` explicitly, everything else is usually logged.

use thiserror::Error;

use crate::types::{LineId, OperatorId, SegmentId};

/// Line engine errors
#[derive(Error, Debug)]
pub enum LineEngineError {
    /// Missing operator, line or queue entry
    #[error("Not found: {0}")]
    NotFound(String),

    /// The line already holds as many operators as its capacity allows
    #[error("Line {line_id} is at capacity ({capacity} operators)")]
    CapacityExceeded { line_id: LineId, capacity: usize },

    /// Operator and line belong to incompatible segments; never auto-resolved
    #[error("Segment mismatch: line {line_id} is scoped to {line_segment:?}, operator {operator_id} belongs to {operator_segment:?}")]
    SegmentMismatch {
        line_id: LineId,
        line_segment: Option<SegmentId>,
        operator_id: OperatorId,
        operator_segment: Option<SegmentId>,
    },

    /// The line's provider integration is not enabled for the segment
    #[error("Provider '{provider}' is not enabled for segment {segment:?}")]
    ProviderDisabled {
        provider: String,
        segment: Option<SegmentId>,
    },

    /// The provider probe failed; always normalized to an unknown state
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A transaction lost a contention race or ran past its deadline
    #[error("Transaction timed out: {0}")]
    TransactionTimeout(String),

    /// The line is banned or disconnected
    #[error("Line {0} is not active")]
    LineNotActive(LineId),

    /// The operation is refused by the current control-panel settings
    #[error("Operation not permitted: {0}")]
    NotPermitted(String),

    /// A hard invariant was found violated after a write
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Database errors that are not contention
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LineEngineError {
    /// Create a new NotFound error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a new ProviderUnavailable error
    pub fn provider_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ProviderUnavailable(msg.into())
    }

    /// Whether re-issuing the same request later may succeed.
    ///
    /// Periodic sweeps rely on this to decide between "retry next tick" and
    /// "log and drop".
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransactionTimeout(_) | Self::ProviderUnavailable(_) | Self::CapacityExceeded { .. }
        )
    }
}

impl From<sqlx::Error> for LineEngineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => Self::TransactionTimeout("timed out acquiring a database connection".to_string()),
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended codes
                let contended = db_err
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .map(|code| matches!(code & 0xff, 5 | 6))
                    .unwrap_or(false);
                if contended {
                    Self::TransactionTimeout(db_err.message().to_string())
                } else {
                    Self::Database(err)
                }
            }
            _ => Self::Database(err),
        }
    }
}

impl From<config::ConfigError> for LineEngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for line engine operations
pub type Result<T> = std::result::Result<T, LineEngineError>;
