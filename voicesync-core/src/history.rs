//! Bounded recency lists.
//!
//! A [`HistoryStore`] keeps its entries newest first and never holds more than
//! `capacity` of them; overflow is evicted from the tail. Keyed entries can be
//! upserted, which keeps at most one entry per key.

use std::collections::VecDeque;

pub trait Keyed {
    fn key(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStore<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryStore<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepend without deduplication. Returns the entry evicted from the tail, if any.
    pub fn push(&mut self, entry: T) -> Option<T> {
        self.entries.push_front(entry);
        self.evict_overflow()
    }

    pub fn most_recent(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Entries in recency order, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_overflow(&mut self) -> Option<T> {
        let mut evicted = None;
        while self.entries.len() > self.capacity {
            evicted = self.entries.pop_back();
        }
        evicted
    }
}

impl<T: Clone> HistoryStore<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

impl<T: Keyed> HistoryStore<T> {
    /// Rebuild a store from persisted entries, already in newest-first order.
    ///
    /// Later duplicates of a key are dropped and the result is truncated to `capacity`.
    pub fn from_entries(capacity: usize, entries: impl IntoIterator<Item = T>) -> Self {
        let mut store = Self::new(capacity);
        for entry in entries {
            if store.len() >= capacity {
                break;
            }
            if store.get(entry.key()).is_none() {
                store.entries.push_back(entry);
            }
        }
        store
    }

    /// Move `entry` to the front, replacing any entry with the same key.
    pub fn upsert(&mut self, entry: T) -> Option<T> {
        let key = entry.key().to_owned();
        self.entries.retain(|existing| existing.key() != key);
        self.push(entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let index = self.entries.iter().position(|entry| entry.key() == key)?;
        self.entries.remove(index)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.iter().find(|entry| entry.key() == key)
    }
}
