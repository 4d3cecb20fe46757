//! Error types for the replication engine.

use tandem_protocol::{ConflictRecord, ProtocolError};
use tandem_store::StoreError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur during a replication session.
///
/// Every error aborts the session. Nothing is committed on the side that
/// reports the error.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// The caller identity was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Every record offered was denied to the caller.
    #[error("authorization denied: {0}")]
    Authorization(String),

    /// Conflicts were found while running in strict mode.
    #[error("{} conflicting record(s) rejected the batch", conflicts.len())]
    Conflict {
        /// The conflicts that caused the rejection.
        conflicts: Vec<ConflictRecord>,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote did not answer in time.
    #[error("operation timed out")]
    Timeout,

    /// Applying the batch to the store failed.
    #[error("store write failed: {0}")]
    StoreWrite(#[from] StoreError),

    /// Malformed or inconsistent message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The session was cancelled.
    #[error("replication cancelled")]
    Cancelled,

    /// The remote's checkpoint moved during the session.
    #[error("checkpoint conflict: {0}")]
    CheckpointConflict(String),

    /// Protocol versions do not match.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },

    /// The transport is closed.
    #[error("not connected to peer")]
    NotConnected,

    /// A session was started while another one was running.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl ReplicationError {
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

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Timeout | Self::CheckpointConflict(_) => true,
            Self::StoreWrite(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns a stable name for the error kind, used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::Authorization(_) => "authorization",
            Self::Conflict { .. } => "conflict",
            Self::Transport { .. } => "transport",
            Self::Timeout => "timeout",
            Self::StoreWrite(StoreError::CheckpointConflict { .. })
            | Self::CheckpointConflict(_) => "checkpoint_conflict",
            Self::StoreWrite(_) => "store_write",
            Self::Protocol(_) => "protocol",
            Self::Cancelled => "cancelled",
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::NotConnected => "not_connected",
            Self::InvalidStateTransition { .. } => "invalid_state",
        }
    }
}
