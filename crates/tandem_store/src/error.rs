//! Error types for store operations.

use std::io;
use tandem_protocol::{ProtocolError, ReplicaId};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the record store or checkpoint store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A write could not be applied. Nothing from the batch was kept.
    #[error("write to '{collection}' failed: {message}")]
    WriteFailed {
        /// Collection being written.
        collection: String,
        /// What went wrong.
        message: String,
    },

    /// The stored checkpoint moved since the caller read it.
    #[error(
        "checkpoint conflict for '{collection}' from {source_id}: expected {expected}, found {actual}"
    )]
    CheckpointConflict {
        /// Collection of the checkpoint.
        collection: String,
        /// Source replica of the checkpoint.
        source_id: ReplicaId,
        /// Sequence the caller expected.
        expected: u64,
        /// Sequence actually stored.
        actual: u64,
    },

    /// An advance would move a checkpoint backwards.
    #[error("checkpoint for '{collection}' from {source_id} cannot move from {current} to {requested}")]
    CheckpointRegression {
        /// Collection of the checkpoint.
        collection: String,
        /// Source replica of the checkpoint.
        source_id: ReplicaId,
        /// Sequence currently stored.
        current: u64,
        /// Sequence requested.
        requested: u64,
    },

    /// Persisted data could not be read back.
    #[error("store data corrupted: {0}")]
    Corrupted(String),

    /// A change entry was malformed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl StoreError {
    /// Creates a write failure.
    pub fn write_failed(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Returns true if the operation may succeed when retried from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CheckpointConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_retryable() {
        let err = StoreError::CheckpointConflict {
            collection: "users".into(),
            source_id: ReplicaId::new("client"),
            expected: 1,
            actual: 2,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("expected 1, found 2"));

        assert!(!StoreError::write_failed("users", "disk full").is_retryable());
    }
}
