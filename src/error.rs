//! Unified error handling for crowdgate.
//!
//! Every per-request failure is mapped to a Deny verdict by the pipeline;
//! these types exist so the cause can be logged and labeled in metrics.

use thiserror::Error;

pub use crate::config::{ConfigError, ValidationError};

// ============================================================================
// Duration Errors (decision payload parsing)
// ============================================================================

/// Errors produced while parsing a textual duration such as `"4h3m"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration {0:?} overflows")]
    Overflow(String),
}

// ============================================================================
// Decision Errors (authority queries)
// ============================================================================

/// Errors that can occur while querying the ban decision authority.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("invalid decision endpoint: {0}")]
    Url(String),

    #[error("decision request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decision API rejected the API key")]
    Forbidden,

    #[error("decision API returned status {0}")]
    Status(u16),

    #[error("malformed decision payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed decision duration: {0}")]
    Duration(#[from] DurationError),
}

impl DecisionError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::Transport(e) if e.is_timeout() => "timeout",
            Self::Transport(_) => "transport",
            Self::Forbidden => "forbidden",
            Self::Status(_) => "status",
            Self::Json(_) => "json",
            Self::Duration(_) => "duration",
        }
    }
}

// ============================================================================
// Store Errors (shared key-value backend)
// ============================================================================

/// Errors raised by a [`SharedStore`](crate::store::SharedStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection pool error: {0}")]
    Pool(String),

    #[error("store command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store holds unexpected value for {key}: {value:?}")]
    Corrupt { key: String, value: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_error_codes() {
        assert_eq!(DecisionError::Forbidden.error_code(), "forbidden");
        assert_eq!(DecisionError::Status(500).error_code(), "status");
        assert_eq!(
            DecisionError::from(DurationError::Empty).error_code(),
            "duration"
        );
        let json_err = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        assert_eq!(DecisionError::from(json_err).error_code(), "json");
    }

    #[test]
    fn test_duration_error_display() {
        let err = DurationError::UnknownUnit {
            unit: "d".to_string(),
            input: "3d".to_string(),
        };
        assert_eq!(err.to_string(), "unknown unit \"d\" in duration \"3d\"");
    }
}
