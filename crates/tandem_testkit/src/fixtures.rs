//! Test fixtures and replica helpers.
//!
//! Provides convenience functions for setting up replicas and the
//! two-replica `users` scenario most tests start from.

use serde_json::Value;
use std::sync::Arc;
use tandem_protocol::{FieldValue, Record, ReplicaId};
use tandem_store::{CheckpointStore, MemoryRecordStore, RecordStore, Replica};
use tempfile::TempDir;

/// Collection used by the standard scenario.
pub const USERS: &str = "users";

/// Builds a record from a JSON object.
///
/// The `id` member becomes the record id; every other member becomes a
/// field. Floats are not supported and panic.
///
/// ```rust
/// use serde_json::json;
/// use tandem_testkit::record;
///
/// let alice = record(json!({"id": "alice", "fullname": "Alice"}));
/// assert_eq!(alice.text("fullname"), Some("Alice"));
/// ```
pub fn record(json: Value) -> Record {
    let Value::Object(map) = json else {
        panic!("record fixture must be a JSON object");
    };
    let id = map
        .get("id")
        .and_then(Value::as_str)
        .expect("record fixture needs a string id");

    let mut record = Record::new(id);
    for (name, value) in &map {
        if name != "id" {
            record.set(name.clone(), field(value));
        }
    }
    record
}

fn field(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => FieldValue::Integer(n.as_i64().expect("integer fields only")),
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Array(items) => FieldValue::List(items.iter().map(field).collect()),
        Value::Object(_) => panic!("nested objects are not record fields"),
    }
}

/// Alice's user record.
pub fn alice() -> Record {
    record(serde_json::json!({"id": "alice", "fullname": "Alice", "age": 31}))
}

/// Peter's user record.
pub fn peter() -> Record {
    record(serde_json::json!({"id": "peter", "fullname": "Peter", "age": 42}))
}

/// Creates an empty in-memory replica.
pub fn memory_replica(name: &str) -> Arc<Replica> {
    Arc::new(Replica::new(Arc::new(MemoryRecordStore::new(
        ReplicaId::new(name),
    ))))
}

/// Creates a replica over an arbitrary store.
pub fn replica_over(store: Arc<dyn RecordStore>) -> Arc<Replica> {
    Arc::new(Replica::new(store))
}

/// A server replica holding Alice and Peter, and an empty client replica.
#[derive(Debug)]
pub struct UsersScenario {
    /// Server replica.
    pub server: Arc<Replica>,
    /// Client replica.
    pub client: Arc<Replica>,
}

impl UsersScenario {
    /// Seeds the scenario.
    pub fn new() -> Self {
        Self::with_client(memory_replica("client"))
    }

    /// Seeds the scenario around an existing client replica.
    pub fn with_client(client: Arc<Replica>) -> Self {
        let server = memory_replica("server");
        server.upsert(USERS, alice()).expect("seed alice");
        server.upsert(USERS, peter()).expect("seed peter");
        Self { server, client }
    }

    /// Returns the server id.
    pub fn server_id(&self) -> ReplicaId {
        self.server.id().clone()
    }

    /// Returns the client id.
    pub fn client_id(&self) -> ReplicaId {
        self.client.id().clone()
    }

    /// Returns the record ids the client holds, sorted.
    pub fn client_ids(&self) -> Vec<String> {
        ids(&self.client)
    }

    /// Returns the record ids the server holds, sorted.
    pub fn server_ids(&self) -> Vec<String> {
        ids(&self.server)
    }
}

impl Default for UsersScenario {
    fn default() -> Self {
        Self::new()
    }
}

fn ids(replica: &Replica) -> Vec<String> {
    replica
        .records(USERS)
        .expect("list records")
        .iter()
        .map(|r| r.id().to_string())
        .collect()
}

/// A replica whose checkpoints live in a temporary directory.
pub struct PersistentReplica {
    /// The replica.
    pub replica: Arc<Replica>,
    temp_dir: TempDir,
}

impl PersistentReplica {
    /// Creates a persistent replica named `name`.
    pub fn new(name: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let replica = Self::open_in(&temp_dir, name);
        Self { replica, temp_dir }
    }

    /// Reopens the checkpoint file in a fresh replica with the same id.
    ///
    /// Records are not persisted; only checkpoints survive.
    pub fn reopen(&self) -> Arc<Replica> {
        Self::open_in(&self.temp_dir, self.replica.id().as_str())
    }

    fn open_in(dir: &TempDir, name: &str) -> Arc<Replica> {
        let checkpoints = CheckpointStore::open(&dir.path().join("checkpoints.cbor"))
            .expect("Failed to open checkpoint store");
        Arc::new(Replica::with_checkpoints(
            Arc::new(MemoryRecordStore::new(ReplicaId::new(name))),
            checkpoints,
        ))
    }
}
