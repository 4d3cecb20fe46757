//! Append-only change log of one collection.

use tandem_protocol::ChangeEntry;

/// Ordered log of change entries.
///
/// Entries are only ever appended, each with the next sequence number.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    entries: Vec<ChangeEntry>,
}

impl ChangeLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sequence of the last entry (0 if empty).
    pub fn last_sequence(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.sequence)
    }

    /// Returns the sequence the next append will get.
    pub fn next_sequence(&self) -> u64 {
        self.last_sequence() + 1
    }

    /// Appends an entry built for the next sequence.
    pub fn append_with<F>(&mut self, build: F) -> &ChangeEntry
    where
        F: FnOnce(u64) -> ChangeEntry,
    {
        let entry = build(self.next_sequence());
        debug_assert_eq!(entry.sequence, self.next_sequence());
        let index = self.entries.len();
        self.entries.push(entry);
        &self.entries[index]
    }

    /// Returns the entries with a sequence above `since`.
    pub fn since(&self, since: u64) -> &[ChangeEntry] {
        let start = self.entries.partition_point(|e| e.sequence <= since);
        &self.entries[start..]
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
