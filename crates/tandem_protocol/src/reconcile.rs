//! Conflict detection between incoming deltas and local changes.

use crate::change::ChangeEntry;
use crate::conflict::ConflictRecord;
use crate::record::RecordId;
use std::collections::HashMap;

/// Outcome of reconciling an incoming delta against local changes.
///
/// Every incoming entry ends up in exactly one of the three buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Entries safe to apply (only the source changed the record).
    pub clean: Vec<ChangeEntry>,
    /// Records changed on both sides to different revisions.
    pub conflicts: Vec<ConflictRecord>,
    /// Records both sides already agree on (equal revisions).
    pub unchanged: Vec<RecordId>,
}

impl Reconciliation {
    /// Returns true if no conflicts were found.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Classifies `incoming` against `local`.
///
/// `local` must be the target's delta since the checkpoint both sides
/// share (one entry per record, as produced by the diff engine). A record
/// conflicts iff both sides have an entry for it and the revisions
/// differ. Equal revisions are an idempotent no-op.
pub fn detect_conflicts(incoming: Vec<ChangeEntry>, local: &[ChangeEntry]) -> Reconciliation {
    let local_by_id: HashMap<&RecordId, &ChangeEntry> =
        local.iter().map(|entry| (&entry.record_id, entry)).collect();

    let mut result = Reconciliation::default();
    for entry in incoming {
        match local_by_id.get(&entry.record_id) {
            None => result.clean.push(entry),
            Some(ours) if ours.revision == entry.revision => {
                result.unchanged.push(entry.record_id);
            }
            Some(ours) => {
                let ours = (*ours).clone();
                result.conflicts.push(ConflictRecord::new(entry, ours));
            }
        }
    }
    result
}
