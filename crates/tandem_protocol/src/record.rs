//! Records, field values and content revisions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Unique key of a record within a collection.
///
/// Ordering is plain string ordering, which is what the diff engine
/// uses to make delta output order-stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A typed field value.
///
/// Floats are intentionally absent so that every value has exactly one
/// digest and revisions stay stable across platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Returns the text if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn digest_into(&self, hasher: &mut Sha256) {
        match self {
            FieldValue::Null => hasher.update([0u8]),
            FieldValue::Bool(b) => hasher.update([1u8, u8::from(*b)]),
            FieldValue::Integer(n) => {
                hasher.update([2u8]);
                hasher.update(n.to_be_bytes());
            }
            FieldValue::Text(s) => {
                hasher.update([3u8]);
                digest_len_prefixed(hasher, s.as_bytes());
            }
            FieldValue::Bytes(b) => {
                hasher.update([4u8]);
                digest_len_prefixed(hasher, b);
            }
            FieldValue::List(items) => {
                hasher.update([5u8]);
                hasher.update((items.len() as u64).to_be_bytes());
                for item in items {
                    item.digest_into(hasher);
                }
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        FieldValue::Integer(i64::from(n))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        FieldValue::Bytes(b)
    }
}

fn digest_len_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// A record: an id plus named, typed fields.
///
/// Fields are kept in a `BTreeMap` so iteration (and therefore the
/// revision digest) is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Creates a record with no fields.
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field, builder style.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Returns the record id.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns a text field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    /// Returns all fields in name order.
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Computes the content revision of this record.
    ///
    /// SHA-256 over a domain tag, the length-prefixed id, the field count
    /// and then each field in name order: its length-prefixed name followed
    /// by a type-tagged value. Lengths and integers are big-endian `u64`
    /// and `i64`. Every variable-length part is prefixed, so no two
    /// distinct records share an input.
    pub fn revision(&self) -> Revision {
        let mut hasher = Sha256::new();
        hasher.update(b"tandem/record/v1");
        digest_len_prefixed(&mut hasher, self.id.as_str().as_bytes());
        hasher.update((self.fields.len() as u64).to_be_bytes());
        for (name, value) in &self.fields {
            digest_len_prefixed(&mut hasher, name.as_bytes());
            value.digest_into(&mut hasher);
        }
        Revision(hasher.finalize().into())
    }
}

/// Content hash identifying one state of a record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision([u8; 32]);

impl Revision {
    /// Creates a revision from raw hash bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the revision of a deleted record.
    ///
    /// Depends only on the record id, so independent deletes of the
    /// same record compare equal.
    pub fn tombstone(id: &RecordId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"tandem/tombstone/v1");
        digest_len_prefixed(&mut hasher, id.as_str().as_bytes());
        Self(hasher.finalize().into())
    }

    /// Returns the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns a short hex prefix for logs.
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self.short())
    }
}
