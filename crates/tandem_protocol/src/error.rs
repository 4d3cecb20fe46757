//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or validating protocol data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Message carried an unsupported protocol version.
    #[error("unsupported protocol version {version} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the message.
        version: u16,
        /// Version this build speaks.
        supported: u16,
    },

    /// A change entry is internally inconsistent.
    #[error("invalid change entry for record {record_id}: {message}")]
    InvalidEntry {
        /// Record the entry refers to.
        record_id: String,
        /// Description of the inconsistency.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid-entry error.
    pub fn invalid_entry(record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEntry {
            record_id: record_id.into(),
            message: message.into(),
        }
    }
}
