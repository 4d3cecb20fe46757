//! Property-based test generators using proptest.
//!
//! Strategies produce local write histories small enough that records
//! collide often, which is what replication properties need.

use proptest::prelude::*;
use tandem_protocol::{FieldValue, Record, RecordId};
use tandem_store::{Replica, StoreResult};

/// A local write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Create or replace a record.
    Upsert(Record),
    /// Delete a record.
    Delete(RecordId),
}

/// Strategy for record ids drawn from a small pool.
pub fn record_id_strategy(pool: u8) -> impl Strategy<Value = RecordId> {
    (0..pool.max(1)).prop_map(|n| RecordId::new(format!("r{n}")))
}

/// Strategy for scalar field values.
pub fn field_value_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Integer),
        "[a-zA-Z ]{0,12}".prop_map(FieldValue::Text),
    ]
}

/// Strategy for records with up to four fields.
pub fn record_strategy(pool: u8) -> impl Strategy<Value = Record> {
    (
        record_id_strategy(pool),
        prop::collection::btree_map("[a-z]{1,6}", field_value_strategy(), 0..4),
    )
        .prop_map(|(id, fields)| {
            fields
                .into_iter()
                .fold(Record::new(id), |record, (name, value)| {
                    record.with_field(name, value)
                })
        })
}

/// Strategy for a history of local writes, roughly one delete in four.
pub fn write_ops_strategy(pool: u8, max_len: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    let op = prop_oneof![
        3 => record_strategy(pool).prop_map(WriteOp::Upsert),
        1 => record_id_strategy(pool).prop_map(WriteOp::Delete),
    ];
    prop::collection::vec(op, 0..max_len)
}

/// Applies a write history to a replica.
pub fn apply_ops(replica: &Replica, collection: &str, ops: &[WriteOp]) -> StoreResult<()> {
    for op in ops {
        match op {
            WriteOp::Upsert(record) => {
                replica.upsert(collection, record.clone())?;
            }
            WriteOp::Delete(id) => {
                replica.delete(collection, id)?;
            }
        }
    }
    Ok(())
}
