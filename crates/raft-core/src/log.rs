//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: used by node.rs for replication, persisted via raft-storage
//! what: LogEntry struct, RaftLog with a snapshot-shifted start, term lookups
//!
//! Entries keep their absolute 1-based index after compaction. Index 0 and the
//! snapshot boundary both act as the sentinel "entry before the first one".

use serde::{Deserialize, Serialize};

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// The command to be applied to the state machine
    pub command: Vec<u8>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: u64, index: u64, command: Vec<u8>) -> Self {
        Self { term, index, command }
    }
}

/// The in-memory log: entries after the snapshot boundary plus the boundary anchor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftLog {
    snapshot_index: u64,
    snapshot_term: u64,
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted parts, rejecting gaps or misnumbered entries.
    pub fn from_parts(
        snapshot_index: u64,
        snapshot_term: u64,
        entries: Vec<LogEntry>,
    ) -> Result<Self, String> {
        let log = Self { snapshot_index, snapshot_term, entries };
        log.check()?;
        Ok(log)
    }

    /// Verify contiguity and non-decreasing terms.
    pub fn check(&self) -> Result<(), String> {
        let mut expected = self.snapshot_index + 1;
        let mut prev_term = self.snapshot_term;
        for entry in &self.entries {
            if entry.index != expected {
                return Err(format!(
                    "log entry at position {} has index {}",
                    expected, entry.index
                ));
            }
            if entry.term < prev_term {
                return Err(format!(
                    "log entry {} has term {} below preceding term {}",
                    entry.index, entry.term, prev_term
                ));
            }
            prev_term = entry.term;
            expected += 1;
        }
        Ok(())
    }

    pub fn snapshot_index(&self) -> u64 {
        self.snapshot_index
    }

    pub fn snapshot_term(&self) -> u64 {
        self.snapshot_term
    }

    /// Index of the first entry still held (may be past the end when empty).
    pub fn first_index(&self) -> u64 {
        self.snapshot_index + 1
    }

    pub fn last_index(&self) -> u64 {
        self.snapshot_index + self.entries.len() as u64
    }

    pub fn last_term(&self) -> u64 {
        self.entries.last().map_or(self.snapshot_term, |e| e.term)
    }

    /// Number of entries held after the snapshot boundary.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    fn position(&self, index: u64) -> Option<usize> {
        if index <= self.snapshot_index || index > self.last_index() {
            return None;
        }
        Some((index - self.snapshot_index - 1) as usize)
    }

    /// Entry at an absolute index, if it is still held.
    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        self.position(index).map(|pos| &self.entries[pos])
    }

    /// Term at an absolute index; the snapshot boundary (and 0) are known too.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        self.get(index).map(|e| e.term)
    }

    /// Clone up to `max` entries starting at `from`.
    pub fn entries_from(&self, from: u64, max: usize) -> Vec<LogEntry> {
        let start = from.max(self.first_index());
        match self.position(start) {
            Some(pos) => {
                let end = (pos + max).min(self.entries.len());
                self.entries[pos..end].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Append a new entry at the end of the log, returning its index.
    pub fn append(&mut self, term: u64, command: Vec<u8>) -> u64 {
        let index = self.last_index() + 1;
        self.entries.push(LogEntry::new(term, index, command));
        index
    }

    /// Append an entry received from a leader; it must extend the log by one.
    pub fn push(&mut self, entry: LogEntry) {
        debug_assert_eq!(entry.index, self.last_index() + 1);
        self.entries.push(entry);
    }

    /// Remove every entry at or after `index`.
    pub fn truncate_from(&mut self, index: u64) {
        if index <= self.snapshot_index {
            self.entries.clear();
            return;
        }
        if let Some(pos) = self.position(index) {
            self.entries.truncate(pos);
        }
    }

    /// Discard entries up to and including `index`, keeping its term as the anchor.
    ///
    /// Returns false if `index` is not held (already compacted or past the end).
    pub fn compact_to(&mut self, index: u64) -> bool {
        let Some(pos) = self.position(index) else {
            return false;
        };
        self.snapshot_term = self.entries[pos].term;
        self.snapshot_index = index;
        self.entries.drain(..=pos);
        true
    }

    /// Drop everything and restart the log right after a snapshot boundary.
    pub fn reset(&mut self, snapshot_index: u64, snapshot_term: u64) {
        self.snapshot_index = snapshot_index;
        self.snapshot_term = snapshot_term;
        self.entries.clear();
    }

    /// First held index whose term is `term`, scanning back from `from`.
    pub fn first_index_of_term(&self, term: u64, from: u64) -> u64 {
        let mut index = from;
        while index > self.first_index() && self.term_at(index - 1) == Some(term) {
            index -= 1;
        }
        index
    }

    /// Last held index whose term is `term`.
    pub fn last_index_of_term(&self, term: u64) -> Option<u64> {
        self.entries.iter().rev().find(|e| e.term == term).map(|e| e.index)
    }

    /// Whether a log ending at (`last_index`, `last_term`) is at least as up-to-date as this one.
    pub fn is_up_to_date(&self, last_index: u64, last_term: u64) -> bool {
        let own_term = self.last_term();
        last_term > own_term || (last_term == own_term && last_index >= self.last_index())
    }
}
