//! Diff engine: the changes of one collection since a checkpoint.
//!
//! The delta contains at most one entry per record (the latest one) and
//! is sorted by record id, so the result does not depend on the order
//! in which unrelated records were written.

use crate::change::ChangeEntry;
use crate::checkpoint::ReplicaId;
use crate::record::RecordId;
use std::collections::BTreeMap;

/// Computes the delta of `collection` since sequence `since`.
///
/// Entries at or below `since` are ignored. For each record the entry
/// with the highest sequence wins (a later entry in iteration order wins
/// a sequence tie), so create→delete reports delete and anything ending
/// in update reports the update with its final field state.
pub fn compute_delta<'a, I>(collection: &str, entries: I, since: u64) -> Vec<ChangeEntry>
where
    I: IntoIterator<Item = &'a ChangeEntry>,
{
    let mut latest: BTreeMap<&RecordId, &ChangeEntry> = BTreeMap::new();

    for entry in entries {
        if entry.sequence <= since || entry.collection != collection {
            continue;
        }
        match latest.get(&entry.record_id) {
            Some(existing) if existing.sequence > entry.sequence => {}
            _ => {
                latest.insert(&entry.record_id, entry);
            }
        }
    }

    latest.into_values().cloned().collect()
}

/// Drops entries whose latest change was authored by `peer`.
///
/// Used when serving a peer: it already holds the state it authored.
pub fn exclude_origin(deltas: Vec<ChangeEntry>, peer: &ReplicaId) -> Vec<ChangeEntry> {
    deltas
        .into_iter()
        .filter(|entry| &entry.origin != peer)
        .collect()
}

/// Returns the highest sequence among `entries`, or `floor` if none is higher.
pub fn max_sequence<'a, I>(entries: I, floor: u64) -> u64
where
    I: IntoIterator<Item = &'a ChangeEntry>,
{
    entries
        .into_iter()
        .map(|entry| entry.sequence)
        .fold(floor, u64::max)
}
