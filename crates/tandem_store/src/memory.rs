//! In-memory record store.

use crate::backend::RecordStore;
use crate::change_log::ChangeLog;
use crate::error::StoreResult;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tandem_protocol::{ChangeEntry, Operation, Record, RecordId, ReplicaId, Revision};

/// Records and change log of one collection.
#[derive(Debug, Clone, Default)]
struct CollectionState {
    records: BTreeMap<RecordId, Record>,
    log: ChangeLog,
}

impl CollectionState {
    fn stored_revision(&self, id: &RecordId) -> Option<Revision> {
        self.records.get(id).map(Record::revision)
    }

    fn write_local(
        &mut self,
        collection: &str,
        record: Record,
        origin: &ReplicaId,
    ) -> Option<ChangeEntry> {
        let existing = self.stored_revision(record.id());
        if existing == Some(record.revision()) {
            return None;
        }
        let origin = origin.clone();
        let entry = self
            .log
            .append_with(|seq| match existing {
                Some(_) => ChangeEntry::update(collection, record.clone(), seq, origin),
                None => ChangeEntry::create(collection, record.clone(), seq, origin),
            })
            .clone();
        self.records.insert(record.id().clone(), record);
        Some(entry)
    }

    fn delete_local(
        &mut self,
        collection: &str,
        id: &RecordId,
        origin: &ReplicaId,
    ) -> Option<ChangeEntry> {
        self.records.remove(id)?;
        let origin = origin.clone();
        let entry = self
            .log
            .append_with(|seq| ChangeEntry::delete(collection, id.clone(), seq, origin))
            .clone();
        Some(entry)
    }

    fn apply_replicated(&mut self, entry: &ChangeEntry) -> Option<ChangeEntry> {
        let existing = self.stored_revision(&entry.record_id);

        let operation = match (&entry.record, existing) {
            (None, None) => return None,
            (None, Some(_)) => Operation::Delete,
            (Some(_), Some(rev)) if rev == entry.revision => return None,
            (Some(_), Some(_)) => Operation::Update,
            (Some(_), None) => Operation::Create,
        };

        match &entry.record {
            Some(record) => {
                self.records.insert(entry.record_id.clone(), record.clone());
            }
            None => {
                self.records.remove(&entry.record_id);
            }
        }
        Some(
            self.log
                .append_with(|seq| entry.resequenced(operation, seq))
                .clone(),
        )
    }
}

/// A record store held entirely in memory.
///
/// Suitable for tests and for replicas that are rebuilt from a peer on
/// start. All operations are thread-safe.
///
/// # Example
///
/// ```rust
/// use tandem_protocol::{Record, RecordId, ReplicaId};
/// use tandem_store::{MemoryRecordStore, RecordStore};
///
/// let store = MemoryRecordStore::new(ReplicaId::new("server"));
/// store.upsert("users", Record::new("alice")).unwrap();
/// assert_eq!(store.current_sequence("users").unwrap(), 1);
/// assert!(store.get("users", &RecordId::from("alice")).unwrap().is_some());
/// ```
#[derive(Debug)]
pub struct MemoryRecordStore {
    origin: ReplicaId,
    collections: RwLock<HashMap<String, CollectionState>>,
}

impl MemoryRecordStore {
    /// Creates an empty store whose local writes are authored by `origin`.
    #[must_use]
    pub fn new(origin: ReplicaId) -> Self {
        Self {
            origin,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of log entries of a collection.
    pub fn log_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |state| state.log.len())
    }
}

impl RecordStore for MemoryRecordStore {
    fn origin(&self) -> &ReplicaId {
        &self.origin
    }

    fn get(&self, collection: &str, id: &RecordId) -> StoreResult<Option<Record>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|state| state.records.get(id).cloned()))
    }

    fn upsert(&self, collection: &str, record: Record) -> StoreResult<Option<ChangeEntry>> {
        let mut collections = self.collections.write();
        let state = collections.entry(collection.to_string()).or_default();
        Ok(state.write_local(collection, record, &self.origin))
    }

    fn delete(&self, collection: &str, id: &RecordId) -> StoreResult<Option<ChangeEntry>> {
        let mut collections = self.collections.write();
        Ok(collections
            .get_mut(collection)
            .and_then(|state| state.delete_local(collection, id, &self.origin)))
    }

    fn all_since(&self, collection: &str, since: u64) -> StoreResult<Vec<ChangeEntry>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|state| state.log.since(since).to_vec())
            .unwrap_or_default())
    }

    fn apply_batch_with(
        &self,
        collection: &str,
        entries: &[ChangeEntry],
        before_visible: &mut dyn FnMut() -> StoreResult<()>,
    ) -> StoreResult<Vec<ChangeEntry>> {
        for entry in entries {
            entry.validate()?;
        }

        let mut collections = self.collections.write();
        let mut staged = collections.get(collection).cloned().unwrap_or_default();
        let appended: Vec<ChangeEntry> = entries
            .iter()
            .filter_map(|entry| staged.apply_replicated(entry))
            .collect();

        before_visible()?;
        if !appended.is_empty() {
            collections.insert(collection.to_string(), staged);
        }
        Ok(appended)
    }

    fn current_sequence(&self, collection: &str) -> StoreResult<u64> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map_or(0, |state| state.log.last_sequence()))
    }

    fn records(&self, collection: &str) -> StoreResult<Vec<Record>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|state| state.records.values().cloned().collect())
            .unwrap_or_default())
    }
}
