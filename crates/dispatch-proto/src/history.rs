//! Bounded, append-only log of history entries.

use std::collections::VecDeque;

use dispatch_types::HistoryItem;

/// Capacity used when none is configured.
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// Ring of the most recent history entries, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLog {
    items: VecDeque<HistoryItem>,
    capacity: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryLog {
    /// An empty log holding at most `capacity` entries (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one entry, evicting the oldest when full.
    pub fn push(&mut self, item: HistoryItem) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Append entries in order.
    pub fn extend(&mut self, items: impl IntoIterator<Item = HistoryItem>) {
        for item in items {
            self.push(item);
        }
    }

    /// Entries, oldest first.
    pub fn items(&self) -> impl Iterator<Item = &HistoryItem> {
        self.items.iter()
    }

    /// Owned copy of the entries, oldest first.
    pub fn to_vec(&self) -> Vec<HistoryItem> {
        self.items.iter().cloned().collect()
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Most entries kept.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
