//! The in-memory index: an ordered `key -> position` mapping rebuilt from
//! disk on every open, plus a snapshot cursor for forward/reverse
//! iteration.
//!
//! This is the primary index (every live key points here), not a
//! secondary one — there is exactly one entry per live key, and it is the
//! sole source of truth for what `Database::get` resolves to a segment
//! read.

use sediment_core::RecordPosition;
use std::collections::BTreeMap;

/// Ordered `key -> position` index.
///
/// Keys are ordered lexicographically by their raw bytes. A single
/// `BTreeMap` satisfies every operation this store needs (point ops plus
/// ordered iteration); swappable backends are a future extension, not a
/// requirement today.
#[derive(Debug, Default)]
pub struct KeyDirIndex {
    entries: BTreeMap<Vec<u8>, RecordPosition>,
}

impl KeyDirIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        KeyDirIndex {
            entries: BTreeMap::new(),
        }
    }

    /// Insert or overwrite `key`'s position, returning the previous one.
    pub fn put(&mut self, key: Vec<u8>, pos: RecordPosition) -> Option<RecordPosition> {
        self.entries.insert(key, pos)
    }

    /// Look up `key`'s current position.
    pub fn get(&self, key: &[u8]) -> Option<RecordPosition> {
        self.entries.get(key).copied()
    }

    /// Remove `key`, returning its prior position if it had one.
    pub fn delete(&mut self, key: &[u8]) -> Option<RecordPosition> {
        self.entries.remove(key)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no live keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create a cursor over a snapshot of the current key ordering.
    ///
    /// The snapshot is an owned copy of the key/position pairs taken at
    /// call time, so later mutation of the index (a concurrent `put` or
    /// `delete` under the same database mutex, interleaved between
    /// cursor steps) never changes what the cursor yields — this gives
    /// iterators the stability required across a single pass.
    pub fn cursor(&self, reverse: bool) -> IndexCursor {
        let mut entries: Vec<(Vec<u8>, RecordPosition)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        if reverse {
            entries.reverse();
        }
        IndexCursor {
            entries,
            reverse,
            pos: 0,
        }
    }
}

/// A stateful snapshot cursor over the index's key ordering at the time
/// it was created.
pub struct IndexCursor {
    entries: Vec<(Vec<u8>, RecordPosition)>,
    reverse: bool,
    pos: usize,
}

impl IndexCursor {
    /// Reset the cursor to the first entry (first in forward order, last
    /// in reverse order, i.e. position 0 of the pre-reversed snapshot).
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Advance to the first entry whose key is `>= key` (forward) or
    /// `<= key` (reverse).
    pub fn seek(&mut self, key: &[u8]) {
        self.pos = if self.reverse {
            self.entries
                .iter()
                .position(|(k, _)| k.as_slice() <= key)
                .unwrap_or(self.entries.len())
        } else {
            self.entries
                .iter()
                .position(|(k, _)| k.as_slice() >= key)
                .unwrap_or(self.entries.len())
        };
    }

    /// Whether the cursor currently points at an entry.
    pub fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    /// The current entry's key. Panics if `!valid()`.
    pub fn key(&self) -> &[u8] {
        &self.entries[self.pos].0
    }

    /// The current entry's position. Panics if `!valid()`.
    pub fn position(&self) -> RecordPosition {
        self.entries[self.pos].1
    }

    /// Advance to the next entry.
    pub fn next(&mut self) {
        self.pos += 1;
    }
}
