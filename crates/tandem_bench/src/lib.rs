//! Benchmark utilities.

use rand::seq::SliceRandom;
use rand::Rng;
use tandem_protocol::{ChangeEntry, Record, RecordId, ReplicaId};

/// Collection every benchmark writes to.
pub const COLLECTION: &str = "bench";

/// Generates a record with a random payload of roughly `payload` bytes.
pub fn random_record(id: impl Into<RecordId>, payload: usize) -> Record {
    let mut rng = rand::thread_rng();
    let text: String = (0..payload)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect();
    Record::new(id)
        .with_field("payload", text)
        .with_field("score", rng.gen_range(0..1_000_000i64))
}

/// Generates a change log of `len` writes over `records` distinct ids.
///
/// Ids are drawn at random so most records are written several times,
/// which is what the diff engine collapses.
pub fn change_log(origin: &ReplicaId, records: usize, len: usize) -> Vec<ChangeEntry> {
    let mut rng = rand::thread_rng();
    (1..=len as u64)
        .map(|sequence| {
            let id = format!("r{}", rng.gen_range(0..records.max(1)));
            ChangeEntry::update(COLLECTION, random_record(id, 32), sequence, origin.clone())
        })
        .collect()
}

/// Splits `delta` into an incoming side and a local side that overlap on
/// `overlap` of the records, with fresh local revisions for those.
pub fn conflicting_sides(
    delta: &[ChangeEntry],
    overlap: f64,
) -> (Vec<ChangeEntry>, Vec<ChangeEntry>) {
    let local_origin = ReplicaId::new("local");
    let mut rng = rand::thread_rng();
    let mut ids: Vec<&RecordId> = delta.iter().map(|e| &e.record_id).collect();
    ids.shuffle(&mut rng);
    let take = (ids.len() as f64 * overlap.clamp(0.0, 1.0)) as usize;

    let local = ids[..take]
        .iter()
        .enumerate()
        .map(|(i, id)| {
            ChangeEntry::update(
                COLLECTION,
                random_record((*id).clone(), 32),
                i as u64 + 1,
                local_origin.clone(),
            )
        })
        .collect();
    (delta.to_vec(), local)
}
