//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a message to JSON.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode JSON bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The payload decoded but violates a structural rule.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// Unknown collection name on the wire.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
}

impl ProtocolError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    pub(crate) fn encoding(err: serde_json::Error) -> Self {
        Self::EncodingFailed {
            message: err.to_string(),
        }
    }

    pub(crate) fn decoding(err: serde_json::Error) -> Self {
        Self::DecodingFailed {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::UnknownCollection("lessons".into());
        assert_eq!(err.to_string(), "unknown collection: lessons");

        let err = ProtocolError::invalid_structure("entity in wrong collection");
        assert!(err.to_string().contains("wrong collection"));
    }
}
