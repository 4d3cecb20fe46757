//! Fault injection for record stores.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tandem_protocol::{ChangeEntry, Record, RecordId, ReplicaId};
use tandem_store::{RecordStore, StoreError, StoreResult};
use tracing::debug;

/// Wraps a store and fails batch applies on demand.
///
/// Local writes and reads always pass through, so tests can set up state
/// and then watch a replication session fail at the apply phase.
pub struct FaultyStore {
    inner: Arc<dyn RecordStore>,
    fail_apply: AtomicBool,
    apply_calls: AtomicUsize,
}

impl FaultyStore {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            fail_apply: AtomicBool::new(false),
            apply_calls: AtomicUsize::new(0),
        }
    }

    /// Makes every following batch apply fail (or succeed again).
    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    /// Returns how many batch applies were attempted.
    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }
}

impl RecordStore for FaultyStore {
    fn origin(&self) -> &ReplicaId {
        self.inner.origin()
    }

    fn get(&self, collection: &str, id: &RecordId) -> StoreResult<Option<Record>> {
        self.inner.get(collection, id)
    }

    fn upsert(&self, collection: &str, record: Record) -> StoreResult<Option<ChangeEntry>> {
        self.inner.upsert(collection, record)
    }

    fn delete(&self, collection: &str, id: &RecordId) -> StoreResult<Option<ChangeEntry>> {
        self.inner.delete(collection, id)
    }

    fn all_since(&self, collection: &str, since: u64) -> StoreResult<Vec<ChangeEntry>> {
        self.inner.all_since(collection, since)
    }

    fn apply_batch_with(
        &self,
        collection: &str,
        entries: &[ChangeEntry],
        before_visible: &mut dyn FnMut() -> StoreResult<()>,
    ) -> StoreResult<Vec<ChangeEntry>> {
        let call = self.apply_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_apply.load(Ordering::SeqCst) {
            debug!(collection, call, entries = entries.len(), "injecting apply failure");
            return Err(StoreError::write_failed(collection, "injected fault"));
        }
        self.inner.apply_batch_with(collection, entries, before_visible)
    }

    fn current_sequence(&self, collection: &str) -> StoreResult<u64> {
        self.inner.current_sequence(collection)
    }

    fn records(&self, collection: &str) -> StoreResult<Vec<Record>> {
        self.inner.records(collection)
    }
}
