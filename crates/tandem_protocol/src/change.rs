//! Change entries: the unit of replication.

use crate::checkpoint::ReplicaId;
use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Operation;
use crate::record::{Record, RecordId, Revision};
use serde::{Deserialize, Serialize};

/// One mutation of one record, as recorded in a replica's change log.
///
/// Entries are append-only. The latest entry for a record id reflects
/// that record's current state in the replica that holds the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Collection the record belongs to.
    pub collection: String,
    /// Record that changed.
    pub record_id: RecordId,
    /// Revision of the record after the change.
    pub revision: Revision,
    /// Kind of mutation.
    pub operation: Operation,
    /// Sequence in the holding replica's log at time of write.
    pub sequence: u64,
    /// Replica that authored the change.
    pub origin: ReplicaId,
    /// Record state after the change (absent for deletes).
    pub record: Option<Record>,
}

impl ChangeEntry {
    /// Creates a create entry.
    pub fn create(
        collection: impl Into<String>,
        record: Record,
        sequence: u64,
        origin: ReplicaId,
    ) -> Self {
        Self::write(collection, Operation::Create, record, sequence, origin)
    }

    /// Creates an update entry.
    pub fn update(
        collection: impl Into<String>,
        record: Record,
        sequence: u64,
        origin: ReplicaId,
    ) -> Self {
        Self::write(collection, Operation::Update, record, sequence, origin)
    }

    /// Creates a delete entry.
    pub fn delete(
        collection: impl Into<String>,
        record_id: RecordId,
        sequence: u64,
        origin: ReplicaId,
    ) -> Self {
        Self {
            collection: collection.into(),
            revision: Revision::tombstone(&record_id),
            record_id,
            operation: Operation::Delete,
            sequence,
            origin,
            record: None,
        }
    }

    fn write(
        collection: impl Into<String>,
        operation: Operation,
        record: Record,
        sequence: u64,
        origin: ReplicaId,
    ) -> Self {
        Self {
            collection: collection.into(),
            record_id: record.id().clone(),
            revision: record.revision(),
            operation,
            sequence,
            origin,
            record: Some(record),
        }
    }

    /// Returns true if this entry deletes its record.
    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }

    /// Returns a copy re-stamped for another replica's log.
    ///
    /// Revision and origin are preserved, so the change stays
    /// recognisable as the same change after replication.
    pub fn resequenced(&self, operation: Operation, sequence: u64) -> Self {
        Self {
            operation,
            sequence,
            ..self.clone()
        }
    }

    /// Checks that the entry is internally consistent.
    ///
    /// Entries received from a peer are validated before they are
    /// reconciled, so a forged revision cannot mask a conflict.
    pub fn validate(&self) -> ProtocolResult<()> {
        match (&self.operation, &self.record) {
            (Operation::Delete, Some(_)) => Err(ProtocolError::invalid_entry(
                self.record_id.as_str(),
                "delete must not carry record state",
            )),
            (Operation::Delete, None) => {
                if self.revision != Revision::tombstone(&self.record_id) {
                    return Err(ProtocolError::invalid_entry(
                        self.record_id.as_str(),
                        "delete revision is not the tombstone revision",
                    ));
                }
                Ok(())
            }
            (_, None) => Err(ProtocolError::invalid_entry(
                self.record_id.as_str(),
                "create/update must carry record state",
            )),
            (_, Some(record)) => {
                if record.id() != &self.record_id {
                    return Err(ProtocolError::invalid_entry(
                        self.record_id.as_str(),
                        format!("record state belongs to {}", record.id()),
                    ));
                }
                if record.revision() != self.revision {
                    return Err(ProtocolError::invalid_entry(
                        self.record_id.as_str(),
                        "revision does not match record state",
                    ));
                }
                Ok(())
            }
        }
    }
}
