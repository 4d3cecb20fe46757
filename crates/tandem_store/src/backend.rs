//! Record store trait definition.

use crate::error::StoreResult;
use tandem_protocol::{ChangeEntry, Record, RecordId, ReplicaId};

/// Keyed record persistence for one replica.
///
/// A record store keeps the current state of every record together with
/// the append-only change log that produced it. Replication never reads
/// record state directly; it works from the change log and hands batches
/// back through [`RecordStore::apply_batch`].
///
/// # Invariants
///
/// - Every mutation appends exactly one [`ChangeEntry`] with the next
///   sequence of its collection
/// - Sequences within a collection are strictly increasing and start at 1
/// - `apply_batch` is all-or-nothing
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::MemoryRecordStore`] - Reference in-memory store
pub trait RecordStore: Send + Sync {
    /// Returns the replica that authors local writes to this store.
    fn origin(&self) -> &ReplicaId;

    /// Reads the current state of a record.
    fn get(&self, collection: &str, id: &RecordId) -> StoreResult<Option<Record>>;

    /// Creates or replaces a record, appending a local change entry.
    ///
    /// Writing a state identical to the stored one is a no-op and
    /// returns `None`.
    fn upsert(&self, collection: &str, record: Record) -> StoreResult<Option<ChangeEntry>>;

    /// Deletes a record, appending a local change entry.
    ///
    /// Returns `None` if the record did not exist.
    fn delete(&self, collection: &str, id: &RecordId) -> StoreResult<Option<ChangeEntry>>;

    /// Returns all log entries of `collection` with a sequence above `since`,
    /// in sequence order.
    fn all_since(&self, collection: &str, since: u64) -> StoreResult<Vec<ChangeEntry>>;

    /// Applies replicated entries atomically.
    ///
    /// Each entry keeps its origin and revision but is re-sequenced into
    /// this store's log. Entries whose revision matches the stored state
    /// are skipped. Returns the entries actually appended. On error nothing
    /// from the batch is visible.
    fn apply_batch(&self, collection: &str, entries: &[ChangeEntry])
        -> StoreResult<Vec<ChangeEntry>> {
        self.apply_batch_with(collection, entries, &mut || Ok(()))
    }

    /// Applies replicated entries atomically, running `before_visible` once
    /// the batch is staged and before any of it can be observed.
    ///
    /// If `before_visible` fails, the staged batch is discarded and its
    /// error returned. Nothing from the batch is visible on any error.
    fn apply_batch_with(
        &self,
        collection: &str,
        entries: &[ChangeEntry],
        before_visible: &mut dyn FnMut() -> StoreResult<()>,
    ) -> StoreResult<Vec<ChangeEntry>>;

    /// Returns the latest sequence of `collection` (0 if never written).
    fn current_sequence(&self, collection: &str) -> StoreResult<u64>;

    /// Returns every live record of `collection`, sorted by id.
    fn records(&self, collection: &str) -> StoreResult<Vec<Record>>;
}
