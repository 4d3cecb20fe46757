//! Conflict records surfaced to callers.

use crate::change::ChangeEntry;
use crate::operation::Operation;
use crate::record::RecordId;
use serde::{Deserialize, Serialize};

/// A record changed independently on both sides since their shared checkpoint.
///
/// Conflicts are data, not errors: the core never resolves them. The
/// target keeps its own value until the caller decides otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Collection of the record.
    pub collection: String,
    /// Record in conflict.
    pub record_id: RecordId,
    /// The incoming change from the source replica.
    pub source: ChangeEntry,
    /// The target replica's own change.
    pub target: ChangeEntry,
}

impl ConflictRecord {
    /// Creates a conflict from the two competing entries.
    pub fn new(source: ChangeEntry, target: ChangeEntry) -> Self {
        Self {
            collection: source.collection.clone(),
            record_id: source.record_id.clone(),
            source,
            target,
        }
    }

    /// Classifies the conflict.
    pub fn kind(&self) -> ConflictKind {
        match (self.source.operation, self.target.operation) {
            (Operation::Delete, _) | (_, Operation::Delete) => ConflictKind::UpdateDelete,
            (Operation::Create, Operation::Create) => ConflictKind::CreateCreate,
            _ => ConflictKind::UpdateUpdate,
        }
    }

    /// Returns the entry that wins under `resolution`.
    pub fn winner(&self, resolution: ConflictResolution) -> &ChangeEntry {
        match resolution {
            ConflictResolution::KeepTarget => &self.target,
            ConflictResolution::AcceptSource => &self.source,
        }
    }
}

/// Classification of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides created a record with the same id.
    CreateCreate,
    /// Both sides updated the record to different states.
    UpdateUpdate,
    /// One side deleted the record, the other wrote it.
    UpdateDelete,
}

/// A caller's decision for one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Keep the target replica's value.
    KeepTarget,
    /// Take the source replica's value.
    AcceptSource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::ReplicaId;
    use crate::record::Record;

    fn entry(op: Operation, name: &str, origin: &str) -> ChangeEntry {
        let record = Record::new("alice").with_field("fullname", name);
        match op {
            Operation::Create => ChangeEntry::create("users", record, 2, ReplicaId::new(origin)),
            Operation::Update => ChangeEntry::update("users", record, 2, ReplicaId::new(origin)),
            Operation::Delete => {
                ChangeEntry::delete("users", RecordId::from("alice"), 2, ReplicaId::new(origin))
            }
        }
    }

    #[test]
    fn conflict_kinds() {
        let cc = ConflictRecord::new(
            entry(Operation::Create, "A", "client"),
            entry(Operation::Create, "B", "server"),
        );
        assert_eq!(cc.kind(), ConflictKind::CreateCreate);

        let uu = ConflictRecord::new(
            entry(Operation::Update, "A", "client"),
            entry(Operation::Update, "B", "server"),
        );
        assert_eq!(uu.kind(), ConflictKind::UpdateUpdate);

        let ud = ConflictRecord::new(
            entry(Operation::Update, "A", "client"),
            entry(Operation::Delete, "", "server"),
        );
        assert_eq!(ud.kind(), ConflictKind::UpdateDelete);
    }

    #[test]
    fn winner_follows_resolution() {
        let conflict = ConflictRecord::new(
            entry(Operation::Update, "A", "client"),
            entry(Operation::Update, "B", "server"),
        );
        assert_eq!(conflict.record_id.as_str(), "alice");
        assert_eq!(conflict.collection, "users");
        assert_eq!(
            conflict.winner(ConflictResolution::KeepTarget).origin,
            ReplicaId::new("server")
        );
        assert_eq!(
            conflict.winner(ConflictResolution::AcceptSource).origin,
            ReplicaId::new("client")
        );
    }
}
