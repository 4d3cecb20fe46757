//! Protocol messages for replication.
//!
//! Every message is a plain serde type encoded as CBOR. The HTTP transport
//! ships these bytes as request and response bodies; in-process transports
//! pass the structs directly.

use crate::change::ChangeEntry;
use crate::checkpoint::ReplicaId;
use crate::conflict::ConflictRecord;
use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

/// CBOR encoding shared by all protocol messages.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Encodes to CBOR.
    fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes from CBOR.
    fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::decoding(e.to_string()))
    }
}

/// Opens a session: who is asking, for which collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Protocol version of the requester.
    pub protocol_version: u16,
    /// Requesting replica.
    pub replica_id: ReplicaId,
    /// Collection to replicate.
    pub collection: String,
}

impl HandshakeRequest {
    /// Creates a handshake request at the current protocol version.
    pub fn new(replica_id: ReplicaId, collection: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            replica_id,
            collection: collection.into(),
        }
    }

    /// Rejects requests speaking another protocol version.
    pub fn check_version(&self) -> ProtocolResult<()> {
        if self.protocol_version == PROTOCOL_VERSION {
            Ok(())
        } else {
            Err(ProtocolError::UnsupportedVersion {
                version: self.protocol_version,
                supported: PROTOCOL_VERSION,
            })
        }
    }
}

impl WireMessage for HandshakeRequest {}

/// The responder's view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Protocol version of the responder.
    pub protocol_version: u16,
    /// Responding replica.
    pub replica_id: ReplicaId,
    /// Collection being replicated.
    pub collection: String,
    /// Latest sequence of the responder's log for the collection.
    pub current_sequence: u64,
    /// How far the responder has consumed the requester's log.
    pub peer_checkpoint: u64,
}

impl WireMessage for HandshakeResponse {}

/// Asks the remote for its changes since a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Collection to pull.
    pub collection: String,
    /// Replica pulling.
    pub requester: ReplicaId,
    /// Sequence of the remote's log already consumed by the requester.
    pub since: u64,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(collection: impl Into<String>, requester: ReplicaId, since: u64) -> Self {
        Self {
            collection: collection.into(),
            requester,
            since,
        }
    }
}

impl WireMessage for PullRequest {}

/// The remote's delta, already filtered by its gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Collection pulled.
    pub collection: String,
    /// Replica that produced the delta.
    pub source: ReplicaId,
    /// One entry per readable changed record, sorted by record id.
    pub deltas: Vec<ChangeEntry>,
    /// Sequence the delta was computed up to.
    pub source_sequence: u64,
    /// Number of records withheld by the gate.
    pub filtered: u64,
}

impl PullResponse {
    /// Checks every entry for internal consistency.
    pub fn validate(&self) -> ProtocolResult<()> {
        validate_entries(&self.collection, &self.deltas)
    }
}

impl WireMessage for PullResponse {}

/// Offers the requester's delta to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Collection pushed.
    pub collection: String,
    /// Replica pushing.
    pub source: ReplicaId,
    /// Checkpoint the pusher believes the remote holds for it.
    pub since: u64,
    /// Sequence of the pusher's log the delta was computed up to.
    pub source_sequence: u64,
    /// How far the pusher has consumed the remote's log.
    pub seen_sequence: u64,
    /// One entry per changed record, sorted by record id.
    pub deltas: Vec<ChangeEntry>,
    /// Reject the whole batch if any conflict is found.
    pub strict: bool,
}

impl PushRequest {
    /// Checks every entry for internal consistency.
    pub fn validate(&self) -> ProtocolResult<()> {
        validate_entries(&self.collection, &self.deltas)
    }
}

impl WireMessage for PushRequest {}

/// Outcome of a push on the receiving replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Replica that received the push.
    pub target: ReplicaId,
    /// False if a strict push was rejected because of conflicts.
    pub committed: bool,
    /// Number of entries applied.
    pub applied: u64,
    /// Number of entries that were already in place.
    pub unchanged: u64,
    /// Number of clean entries held back behind an unresolved conflict.
    pub deferred: u64,
    /// Number of entries the gate filtered out.
    pub denied: u64,
    /// Conflicts found; the receiver kept its own values for these.
    pub conflicts: Vec<ConflictRecord>,
    /// Checkpoint the receiver now holds for the pusher.
    pub checkpoint: u64,
    /// Latest sequence of the receiver's log after the push.
    pub target_sequence: u64,
}

impl WireMessage for PushResponse {}

/// Error body returned by a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable kind.
    pub kind: String,
    /// Human readable message.
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error body.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl WireMessage for ErrorResponse {}

fn validate_entries(collection: &str, entries: &[ChangeEntry]) -> ProtocolResult<()> {
    for entry in entries {
        if entry.collection != collection {
            return Err(ProtocolError::invalid_entry(
                entry.record_id.as_str(),
                format!("entry for '{}' in '{collection}' batch", entry.collection),
            ));
        }
        entry.validate()?;
    }
    Ok(())
}
