//! Error types for the replication server.

use tandem_engine::ReplicationError;
use tandem_store::StoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the replication server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No handler for the requested path.
    #[error("unknown route: {0}")]
    UnknownRoute(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The client's view of the checkpoint is stale.
    #[error("checkpoint conflict: {0}")]
    CheckpointConflict(String),

    /// Protocol version mismatch.
    #[error("protocol version mismatch: {0}")]
    ProtocolMismatch(String),

    /// The record store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::ProtocolMismatch(_) => 400,
            ServerError::AuthenticationFailed(_) => 401,
            ServerError::NotAuthorized(_) => 403,
            ServerError::UnknownRoute(_) => 404,
            ServerError::CheckpointConflict(_) => 409,
            ServerError::Storage(_) | ServerError::Internal(_) => 500,
        }
    }

    /// Returns a short machine-readable name for the error body.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::UnknownRoute(_) => "unknown_route",
            ServerError::AuthenticationFailed(_) => "authentication",
            ServerError::NotAuthorized(_) => "authorization",
            ServerError::CheckpointConflict(_) => "checkpoint_conflict",
            ServerError::ProtocolMismatch(_) => "protocol_mismatch",
            ServerError::Storage(_) => "storage",
            ServerError::Internal(_) => "internal",
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<ReplicationError> for ServerError {
    fn from(err: ReplicationError) -> Self {
        match err {
            ReplicationError::Authentication(msg) => ServerError::AuthenticationFailed(msg),
            ReplicationError::Authorization(msg) => ServerError::NotAuthorized(msg),
            ReplicationError::CheckpointConflict(msg) => ServerError::CheckpointConflict(msg),
            ReplicationError::StoreWrite(store @ StoreError::CheckpointConflict { .. }) => {
                ServerError::CheckpointConflict(store.to_string())
            }
            ReplicationError::StoreWrite(StoreError::Protocol(e)) | ReplicationError::Protocol(e) => {
                ServerError::InvalidRequest(e.to_string())
            }
            ReplicationError::StoreWrite(store) => ServerError::Storage(store.to_string()),
            err @ ReplicationError::VersionMismatch { .. } => {
                ServerError::ProtocolMismatch(err.to_string())
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}
