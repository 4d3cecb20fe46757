//! # Tandem Protocol
//!
//! Replication protocol types and pure algorithms for Tandem.
//!
//! This crate provides:
//! - `Record`, `Revision` and `ChangeEntry` for tracked changes
//! - `compute_delta` (the diff engine) and `detect_conflicts`
//! - The `AuthorizationGate` contract with reference policies
//! - Protocol messages (Handshake, Pull, Push) encoded as CBOR
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod authz;
mod change;
mod checkpoint;
mod conflict;
mod diff;
mod error;
mod messages;
mod operation;
mod reconcile;
mod record;

pub use authz::{
    filter_authorized, AccessRequest, AllowAll, Authentication, AuthorizationGate, Authorized,
    CallerIdentity, Decision, OwnerPolicy, OwnerRule,
};
pub use change::ChangeEntry;
pub use checkpoint::{Checkpoint, CheckpointKey, ReplicaId};
pub use conflict::{ConflictKind, ConflictRecord, ConflictResolution};
pub use diff::{compute_delta, exclude_origin, max_sequence};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ErrorResponse, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest,
    PushResponse, WireMessage, PROTOCOL_VERSION,
};
pub use operation::{Access, Operation};
pub use reconcile::{detect_conflicts, Reconciliation};
pub use record::{FieldValue, Record, RecordId, Revision};
