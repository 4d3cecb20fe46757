//! # Tandem Store
//!
//! Record store, change log and checkpoint store for Tandem replicas.
//!
//! The record store is an opaque persistence boundary: replication only
//! talks to it through the [`RecordStore`] trait. A [`Replica`] combines a
//! record store with its [`CheckpointStore`] and serializes local writes
//! and inbound commits behind one lock.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tandem_protocol::{Record, ReplicaId};
//! use tandem_store::{MemoryRecordStore, Replica};
//!
//! let replica = Replica::new(Arc::new(MemoryRecordStore::new(ReplicaId::new("client"))));
//! replica.upsert("users", Record::new("alice").with_field("fullname", "Alice")).unwrap();
//! assert_eq!(replica.delta_since("users", 0).unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod change_log;
mod checkpoint;
mod error;
mod file;
mod memory;
mod replica;

pub use backend::RecordStore;
pub use change_log::ChangeLog;
pub use checkpoint::CheckpointStore;
pub use error::{StoreError, StoreResult};
pub use file::CheckpointFile;
pub use memory::MemoryRecordStore;
pub use replica::{CommitOutcome, CommitStage, CommitStatus, InboundBatch, OutgoingBatch, Replica};
