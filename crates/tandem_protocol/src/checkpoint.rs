//! Replica identities and checkpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one replica.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Creates a replica id from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generates a random replica id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// A point in one replica's change log.
///
/// The sequence is scoped to a single collection of `source`. Sequence 0
/// means "nothing yet"; the first write of a collection gets sequence 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Replica whose log this points into.
    pub source: ReplicaId,
    /// Sequence number within that log.
    pub sequence: u64,
}

impl Checkpoint {
    /// Creates a checkpoint.
    pub fn new(source: ReplicaId, sequence: u64) -> Self {
        Self { source, sequence }
    }

    /// Returns the "nothing consumed yet" checkpoint for a source.
    pub fn origin(source: ReplicaId) -> Self {
        Self {
            source,
            sequence: 0,
        }
    }

    /// Returns true if nothing has been consumed from the source yet.
    pub fn is_origin(&self) -> bool {
        self.sequence == 0
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source, self.sequence)
    }
}

/// Key of a stored checkpoint: which collection, consumed from which source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckpointKey {
    /// Collection name.
    pub collection: String,
    /// Replica the checkpoint points into.
    pub source: ReplicaId,
}

impl CheckpointKey {
    /// Creates a key.
    pub fn new(collection: impl Into<String>, source: ReplicaId) -> Self {
        Self {
            collection: collection.into(),
            source,
        }
    }
}
