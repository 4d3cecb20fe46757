//! A replica: record store, checkpoints and the single-writer commit.

use crate::backend::RecordStore;
use crate::checkpoint::CheckpointStore;
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tandem_protocol::{
    compute_delta, detect_conflicts, exclude_origin, max_sequence, ChangeEntry, ConflictRecord,
    ConflictResolution, Record, RecordId, ReplicaId, Revision,
};

/// Everything needed to commit one inbound batch.
#[derive(Debug, Clone)]
pub struct InboundBatch {
    /// Collection being replicated.
    pub collection: String,
    /// Replica the entries came from.
    pub source: ReplicaId,
    /// Incoming deltas, already authorized.
    pub incoming: Vec<ChangeEntry>,
    /// Our log sequence the source has already seen. Local changes after
    /// it are candidates for conflicts.
    pub local_since: u64,
    /// Checkpoint for `source` the caller expects to be stored.
    pub expected_checkpoint: u64,
    /// Checkpoint for `source` to store once the batch is applied.
    pub new_checkpoint: u64,
    /// Reject the whole batch if any conflict is found.
    pub strict: bool,
}

/// Local changes to offer a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingBatch {
    /// Latest entry per changed record, excluding the peer's own changes.
    pub deltas: Vec<ChangeEntry>,
    /// Log sequence the batch covers, echoed entries included.
    pub up_to: u64,
}

/// Point reached inside an inbound commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    /// About to reconcile against local changes.
    Detecting,
    /// About to write clean entries to the store.
    Applying,
}

/// How an inbound commit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitStatus {
    /// Clean entries applied and checkpoint advanced.
    #[default]
    Committed,
    /// A strict batch found conflicts. Nothing changed.
    Rejected,
    /// The stage hook stopped the commit. Nothing changed.
    Halted,
}

/// Outcome of [`Replica::commit_inbound`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Entries appended to the local log.
    pub applied: Vec<ChangeEntry>,
    /// Incoming entries that were already in place.
    pub unchanged: usize,
    /// Clean entries held back because they follow an unresolved conflict
    /// in the source's log. They are offered again by the next session.
    pub deferred: usize,
    /// Records changed on both sides. Local values were kept.
    pub conflicts: Vec<ConflictRecord>,
    /// Checkpoint now stored for the source.
    pub checkpoint: u64,
    /// How the commit ended.
    pub status: CommitStatus,
}

impl CommitOutcome {
    fn unchanged_at(checkpoint: u64, status: CommitStatus) -> Self {
        Self {
            checkpoint,
            status,
            ..Self::default()
        }
    }

    /// Returns true if the batch was committed.
    pub fn is_committed(&self) -> bool {
        self.status == CommitStatus::Committed
    }
}

/// One replica of the data set.
///
/// Local writes and inbound commits share one commit lock, so conflict
/// detection always sees every local write that precedes the apply.
///
/// A reported conflict holds the checkpoint for its source just below the
/// conflicting entry, so the entry keeps being offered (and reported) in
/// every later session until [`Replica::resolve_conflict`] settles it.
pub struct Replica {
    id: ReplicaId,
    store: Arc<dyn RecordStore>,
    checkpoints: CheckpointStore,
    commit_lock: Mutex<()>,
    overruled: Mutex<HashMap<String, HashMap<RecordId, Revision>>>,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("id", &self.id)
            .field("checkpoints", &self.checkpoints)
            .finish_non_exhaustive()
    }
}

impl Replica {
    /// Creates a replica over `store` with in-memory checkpoints.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_checkpoints(store, CheckpointStore::new())
    }

    /// Creates a replica with an explicit checkpoint store.
    pub fn with_checkpoints(store: Arc<dyn RecordStore>, checkpoints: CheckpointStore) -> Self {
        Self {
            id: store.origin().clone(),
            store,
            checkpoints,
            commit_lock: Mutex::new(()),
            overruled: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the replica id.
    pub fn id(&self) -> &ReplicaId {
        &self.id
    }

    /// Returns the underlying record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Returns the checkpoint store.
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Returns how far this replica has consumed `source`'s log.
    pub fn checkpoint(&self, collection: &str, source: &ReplicaId) -> u64 {
        self.checkpoints.get(collection, source)
    }

    /// Reads a record.
    pub fn get(&self, collection: &str, id: &RecordId) -> StoreResult<Option<Record>> {
        self.store.get(collection, id)
    }

    /// Lists the live records of a collection.
    pub fn records(&self, collection: &str) -> StoreResult<Vec<Record>> {
        self.store.records(collection)
    }

    /// Returns the latest sequence of a collection's log.
    pub fn current_sequence(&self, collection: &str) -> StoreResult<u64> {
        self.store.current_sequence(collection)
    }

    /// Writes a record locally.
    pub fn upsert(&self, collection: &str, record: Record) -> StoreResult<Option<ChangeEntry>> {
        let _guard = self.commit_lock.lock();
        self.store.upsert(collection, record)
    }

    /// Deletes a record locally.
    pub fn delete(&self, collection: &str, id: &RecordId) -> StoreResult<Option<ChangeEntry>> {
        let _guard = self.commit_lock.lock();
        self.store.delete(collection, id)
    }

    /// Returns the delta of `collection` since `since`.
    pub fn delta_since(&self, collection: &str, since: u64) -> StoreResult<Vec<ChangeEntry>> {
        let entries = self.store.all_since(collection, since)?;
        Ok(compute_delta(collection, &entries, since))
    }

    /// Returns the delta to offer `peer`: changes since `since` that did
    /// not originate at `peer`.
    pub fn outgoing_delta(
        &self,
        collection: &str,
        since: u64,
        peer: &ReplicaId,
    ) -> StoreResult<Vec<ChangeEntry>> {
        Ok(exclude_origin(self.delta_since(collection, since)?, peer))
    }

    /// Reads the batch to offer `peer` in one pass over the log.
    ///
    /// `up_to` also covers entries that were filtered out because `peer`
    /// authored them, so the peer's checkpoint can move past its echoes.
    pub fn outgoing_batch(
        &self,
        collection: &str,
        since: u64,
        peer: &ReplicaId,
    ) -> StoreResult<OutgoingBatch> {
        let entries = self.store.all_since(collection, since)?;
        let up_to = max_sequence(&entries, since);
        let deltas = exclude_origin(compute_delta(collection, &entries, since), peer);
        Ok(OutgoingBatch { deltas, up_to })
    }

    /// Returns the last live state of each of `ids`, read from the log.
    ///
    /// Records that were deleted still report the state they had before
    /// the delete. Ids that never held a state are absent.
    pub fn last_live_states(
        &self,
        collection: &str,
        ids: &[RecordId],
    ) -> StoreResult<HashMap<RecordId, Record>> {
        let mut states = HashMap::new();
        if ids.is_empty() {
            return Ok(states);
        }
        let wanted: HashSet<&RecordId> = ids.iter().collect();
        for entry in self.store.all_since(collection, 0)? {
            if !wanted.contains(&entry.record_id) {
                continue;
            }
            if let Some(record) = entry.record {
                states.insert(entry.record_id, record);
            }
        }
        Ok(states)
    }

    /// Reconciles and commits an inbound batch as one transaction.
    ///
    /// Under the commit lock: checks the expected checkpoint, detects
    /// conflicts against local changes since `local_since`, applies the
    /// clean entries and persists the new checkpoint before the applied
    /// entries become visible. A failure in either step leaves records and
    /// checkpoint untouched.
    ///
    /// The new checkpoint stops below the earliest conflicting entry;
    /// clean entries past that point are deferred to a later session.
    pub fn commit_inbound(&self, batch: InboundBatch) -> StoreResult<CommitOutcome> {
        self.commit_inbound_with(batch, |_| true)
    }

    /// Like [`Replica::commit_inbound`], calling `proceed` before each
    /// stage. Returning false halts the commit with nothing changed.
    pub fn commit_inbound_with<F>(
        &self,
        batch: InboundBatch,
        mut proceed: F,
    ) -> StoreResult<CommitOutcome>
    where
        F: FnMut(CommitStage) -> bool,
    {
        let _guard = self.commit_lock.lock();

        let stored = self.checkpoints.get(&batch.collection, &batch.source);
        if stored != batch.expected_checkpoint {
            return Err(StoreError::CheckpointConflict {
                collection: batch.collection,
                source_id: batch.source,
                expected: batch.expected_checkpoint,
                actual: stored,
            });
        }

        if !proceed(CommitStage::Detecting) {
            return Ok(CommitOutcome::unchanged_at(stored, CommitStatus::Halted));
        }
        let local = self.outgoing_delta(&batch.collection, batch.local_since, &batch.source)?;
        let (overruled, incoming) = self.split_overruled(&batch.collection, batch.incoming);
        let reconciliation = detect_conflicts(incoming, &local);

        if batch.strict && !reconciliation.is_clean() {
            tracing::debug!(
                collection = %batch.collection,
                source = %batch.source,
                conflicts = reconciliation.conflicts.len(),
                "strict batch rejected"
            );
            return Ok(CommitOutcome {
                conflicts: reconciliation.conflicts,
                ..CommitOutcome::unchanged_at(stored, CommitStatus::Rejected)
            });
        }
        if !proceed(CommitStage::Applying) {
            return Ok(CommitOutcome::unchanged_at(stored, CommitStatus::Halted));
        }

        let checkpoint = reconciliation
            .conflicts
            .iter()
            .map(|conflict| conflict.source.sequence.saturating_sub(1))
            .min()
            .map_or(batch.new_checkpoint, |held| held.min(batch.new_checkpoint))
            .max(stored);
        let (ready, deferred): (Vec<ChangeEntry>, Vec<ChangeEntry>) = reconciliation
            .clean
            .into_iter()
            .partition(|entry| entry.sequence <= checkpoint);
        let (released, still_overruled): (Vec<ChangeEntry>, Vec<ChangeEntry>) = overruled
            .into_iter()
            .partition(|entry| entry.sequence <= checkpoint);

        let checkpoints = &self.checkpoints;
        let (collection, source) = (&batch.collection, &batch.source);
        let applied = self.store.apply_batch_with(collection, &ready, &mut || {
            checkpoints.advance(collection, source, stored, checkpoint)
        })?;
        self.release_overruled(collection, &released);

        let unchanged =
            reconciliation.unchanged.len() + (ready.len() - applied.len()) + released.len();
        let deferred = deferred.len() + still_overruled.len();

        tracing::debug!(
            collection = %batch.collection,
            source = %batch.source,
            applied = applied.len(),
            conflicts = reconciliation.conflicts.len(),
            deferred,
            checkpoint,
            "inbound batch committed"
        );

        Ok(CommitOutcome {
            applied,
            unchanged,
            deferred,
            conflicts: reconciliation.conflicts,
            checkpoint,
            status: CommitStatus::Committed,
        })
    }

    fn split_overruled(
        &self,
        collection: &str,
        incoming: Vec<ChangeEntry>,
    ) -> (Vec<ChangeEntry>, Vec<ChangeEntry>) {
        let marks = self.overruled.lock();
        let Some(marks) = marks.get(collection) else {
            return (Vec::new(), incoming);
        };
        incoming
            .into_iter()
            .partition(|entry| marks.get(&entry.record_id) == Some(&entry.revision))
    }

    fn release_overruled(&self, collection: &str, released: &[ChangeEntry]) {
        if released.is_empty() {
            return;
        }
        let mut marks = self.overruled.lock();
        if let Some(marks) = marks.get_mut(collection) {
            for entry in released {
                if marks.get(&entry.record_id) == Some(&entry.revision) {
                    marks.remove(&entry.record_id);
                }
            }
        }
    }

    /// Records a caller's decision for a reported conflict.
    ///
    /// `AcceptSource` writes the source's value as a local change, so it
    /// replicates onward like any other write. `KeepTarget` leaves the
    /// record alone and marks the source's revision as overruled: the next
    /// session from the source passes over it, after which the local value
    /// flows back to the source as an ordinary change. Returns the appended
    /// entry, if any.
    ///
    /// Overruled marks live in memory; after a restart the conflict is
    /// reported again.
    pub fn resolve_conflict(
        &self,
        conflict: &ConflictRecord,
        resolution: ConflictResolution,
    ) -> StoreResult<Option<ChangeEntry>> {
        {
            let mut marks = self.overruled.lock();
            let marks = marks.entry(conflict.collection.clone()).or_default();
            match resolution {
                ConflictResolution::KeepTarget => {
                    marks.insert(conflict.record_id.clone(), conflict.source.revision);
                    return Ok(None);
                }
                ConflictResolution::AcceptSource => {
                    marks.remove(&conflict.record_id);
                }
            }
        }
        let winner = conflict.winner(resolution);
        match &winner.record {
            Some(record) => self.upsert(&conflict.collection, record.clone()),
            None => self.delete(&conflict.collection, &conflict.record_id),
        }
    }
}
