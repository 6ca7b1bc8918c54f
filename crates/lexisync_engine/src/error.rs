//! Error types for the sync engine.

use lexisync_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network unreachable or the request failed in transit.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// A request exceeded the per-request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The response could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// A sync job is already in flight.
    #[error("a sync job is already running")]
    AlreadyRunning,

    /// A sync was requested for no collections.
    #[error("sync requested for an empty collection set")]
    EmptyCollections,

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A background run was requested outside a Tokio runtime.
    #[error("no tokio runtime available to run the sync")]
    NoRuntime,

    /// The job was stopped by an explicit cancel.
    #[error("sync cancelled")]
    Cancelled,

    /// The local store failed to read or write.
    #[error("store error: {0}")]
    Store(String),

    /// A background sync task ended abnormally.
    #[error("sync task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true for network failures, timeouts included.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport { .. } | SyncError::Timeout(_))
    }

    /// Returns true for caller errors surfaced before any network access.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SyncError::AlreadyRunning
                | SyncError::EmptyCollections
                | SyncError::InvalidConfig(_)
                | SyncError::NoRuntime
        )
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad certificate").is_retryable());
        assert!(SyncError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(!SyncError::Parse("unexpected token".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn classification() {
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_transport());
        assert!(!SyncError::Parse("x".into()).is_transport());
        assert!(SyncError::AlreadyRunning.is_precondition());
        assert!(SyncError::EmptyCollections.is_precondition());
        assert!(SyncError::NoRuntime.is_precondition());
        assert!(!SyncError::Cancelled.is_precondition());
    }

    #[test]
    fn protocol_errors_become_parse_errors() {
        let err: SyncError = ProtocolError::UnknownCollection("lessons".into()).into();
        assert!(matches!(err, SyncError::Parse(msg) if msg.contains("lessons")));
    }

    #[test]
    fn error_display() {
        assert_eq!(
            SyncError::AlreadyRunning.to_string(),
            "a sync job is already running"
        );
        assert!(SyncError::Timeout(Duration::from_secs(5))
            .to_string()
            .contains("5s"));
    }
}
