//! # Tandem Engine
//!
//! Replication orchestrator for Tandem replicas.
//!
//! This crate provides:
//! - [`Replicator`], the session state machine (pull, push, sync, retry)
//! - [`ReplicaEndpoint`], the serving side of a session
//! - [`ReplicationTransport`] with in-process, mock and HTTP implementations
//!
//! ## Session flow
//!
//! ```text
//! Idle -> FetchingDeltas -> Authorizing -> DetectingConflicts -> Applying -> Committed
//!              |                |                                   |
//!              +----------------+-------------> Aborted <-----------+
//! ```
//!
//! A session either commits (clean deltas applied, checkpoint advanced,
//! conflicts reported) or aborts with no state change.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod endpoint;
mod error;
mod http;
mod state;
mod transport;

pub use config::{ConsistencyMode, ReplicationConfig, RetryConfig};
pub use endpoint::ReplicaEndpoint;
pub use error::{ReplicationError, ReplicationResult};
pub use http::{
    HttpClient, HttpFailure, HttpRequest, HttpResponse, HttpTransport, LoopbackClient,
    LoopbackServer, ROUTE_PREFIX,
};
pub use state::{
    CancelHandle, Direction, ReplicationStats, Replicator, SessionReport, SessionState, SyncReport,
};
pub use transport::{LocalTransport, MockTransport, ReplicationTransport};
