//! File persistence for checkpoints.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tandem_protocol::{CheckpointKey, ReplicaId};

/// One persisted checkpoint tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedCheckpoint {
    collection: String,
    source: ReplicaId,
    sequence: u64,
}

/// A CBOR file holding every checkpoint of a replica.
///
/// Saves write a sibling temporary file, sync it and rename it over the
/// target, so a crash leaves either the old or the new contents.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    /// Creates a handle for `path`. Nothing is touched until load or save.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Returns the path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads all checkpoints. A missing file yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid CBOR.
    pub fn load(&self) -> StoreResult<BTreeMap<CheckpointKey, u64>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let tuples: Vec<PersistedCheckpoint> = ciborium::de::from_reader(BufReader::new(file))
            .map_err(|e| StoreError::Corrupted(format!("{}: {e}", self.path.display())))?;

        Ok(tuples
            .into_iter()
            .map(|t| (CheckpointKey::new(t.collection, t.source), t.sequence))
            .collect())
    }

    /// Atomically replaces the file with `entries`.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or renamed.
    pub fn save(&self, entries: &BTreeMap<CheckpointKey, u64>) -> StoreResult<()> {
        let tuples: Vec<PersistedCheckpoint> = entries
            .iter()
            .map(|(key, sequence)| PersistedCheckpoint {
                collection: key.collection.clone(),
                source: key.source.clone(),
                sequence: *sequence,
            })
            .collect();

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&tuples, &mut buf)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
