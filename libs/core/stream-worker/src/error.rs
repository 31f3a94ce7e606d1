//! Stream error types and error categorization
//!
//! The category of a handler error decides whether the job is retried:
//! - **Transient**: retried while the job still has attempts left
//! - **Permanent**: recorded as failed immediately

use std::time::Duration;
use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure, retry with backoff
    Transient,
    /// Unrecoverable, no further attempts
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

/// Errors raised by the durable backend and by job processors.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Job processing failed
    #[error("Processing error: {message}")]
    Processing {
        message: String,
        category: ErrorCategory,
    },

    /// Job exceeded its execution budget
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    /// Backend target missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared connection was closed by shutdown
    #[error("Connection closed")]
    Closed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Create a transient processing error
    pub fn transient(message: impl Into<String>) -> Self {
        StreamError::Processing {
            message: message.into(),
            category: ErrorCategory::Transient,
        }
    }

    /// Create a permanent processing error
    pub fn permanent(message: impl Into<String>) -> Self {
        StreamError::Processing {
            message: message.into(),
            category: ErrorCategory::Permanent,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Redis(_) => ErrorCategory::Transient,
            StreamError::Serialization(_) => ErrorCategory::Permanent,
            StreamError::Processing { category, .. } => *category,
            StreamError::Timeout(_) => ErrorCategory::Transient,
            StreamError::Config(_) => ErrorCategory::Permanent,
            StreamError::Closed => ErrorCategory::Permanent,
            StreamError::Internal(_) => ErrorCategory::Permanent,
        }
    }

    /// Connection-level failure worth backing off for.
    pub fn is_connection_error(&self) -> bool {
        match self {
            StreamError::Redis(e) => {
                e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped()
            }
            _ => false,
        }
    }

    /// The consumer group disappeared (e.g. the stream key was deleted).
    pub fn is_nogroup_error(&self) -> bool {
        matches!(self, StreamError::Redis(e) if e.code() == Some("NOGROUP"))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(StreamError::transient("x").category(), ErrorCategory::Transient);
        assert_eq!(StreamError::permanent("x").category(), ErrorCategory::Permanent);
        assert_eq!(
            StreamError::Timeout(Duration::from_secs(1)).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            StreamError::Config("missing".into()).category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn test_serde_error_is_permanent() {
        let err: StreamError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, StreamError::Serialization(_)));
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_non_redis_errors_are_not_connection_errors() {
        assert!(!StreamError::Closed.is_connection_error());
        assert!(!StreamError::transient("x").is_nogroup_error());
    }
}
