//! Checkpoint store: how far this replica has consumed each peer's log.

use crate::error::{StoreError, StoreResult};
use crate::file::CheckpointFile;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use tandem_protocol::{Checkpoint, CheckpointKey, ReplicaId};

/// Per-replica checkpoint store keyed by `(collection, source)`.
///
/// Advancing is a compare-and-swap on the expected sequence and never
/// moves a checkpoint backwards. When opened on a file, every advance is
/// persisted before it becomes visible.
#[derive(Debug, Default)]
pub struct CheckpointStore {
    entries: RwLock<BTreeMap<CheckpointKey, u64>>,
    file: Option<CheckpointFile>,
}

impl CheckpointStore {
    /// Creates an empty in-memory checkpoint store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a persistent checkpoint store, loading existing checkpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = CheckpointFile::new(path);
        let entries = file.load()?;
        Ok(Self {
            entries: RwLock::new(entries),
            file: Some(file),
        })
    }

    /// Returns the consumed sequence for `(collection, source)` (0 if none).
    pub fn get(&self, collection: &str, source: &ReplicaId) -> u64 {
        self.entries
            .read()
            .get(&CheckpointKey::new(collection, source.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the checkpoint for `(collection, source)`.
    pub fn checkpoint(&self, collection: &str, source: &ReplicaId) -> Checkpoint {
        Checkpoint::new(source.clone(), self.get(collection, source))
    }

    /// Advances `(collection, source)` from `expected` to `sequence`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CheckpointConflict`] if the stored value is not `expected`
    /// - [`StoreError::CheckpointRegression`] if `sequence < expected`
    /// - an I/O error if persisting fails, in which case nothing changes
    pub fn advance(
        &self,
        collection: &str,
        source: &ReplicaId,
        expected: u64,
        sequence: u64,
    ) -> StoreResult<()> {
        let key = CheckpointKey::new(collection, source.clone());
        let mut entries = self.entries.write();
        let actual = entries.get(&key).copied().unwrap_or(0);

        if actual != expected {
            return Err(StoreError::CheckpointConflict {
                collection: collection.to_string(),
                source_id: source.clone(),
                expected,
                actual,
            });
        }
        if sequence < actual {
            return Err(StoreError::CheckpointRegression {
                collection: collection.to_string(),
                source_id: source.clone(),
                current: actual,
                requested: sequence,
            });
        }
        if sequence == actual {
            return Ok(());
        }

        if let Some(file) = &self.file {
            let mut next = entries.clone();
            next.insert(key.clone(), sequence);
            file.save(&next)?;
        }
        entries.insert(key, sequence);
        tracing::debug!(collection, source = %source, sequence, "checkpoint advanced");
        Ok(())
    }

    /// Returns every stored checkpoint, ordered by key.
    pub fn snapshot(&self) -> Vec<(CheckpointKey, u64)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Returns the backing file path, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(CheckpointFile::path)
    }
}
