//! Partition item table
//!
//! BTreeMap-based item storage. Not synchronized; the owning partition wraps
//! it in a lock.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

/// A stored item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: Bytes,
    pub value: Bytes,
    pub flags: u32,
    pub expiration: u32,
    pub cas: u64,
}

impl Item {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            flags: 0,
            expiration: 0,
            cas: 0,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_expiration(mut self, expiration: u32) -> Self {
        self.expiration = expiration;
        self
    }

    /// Resident size counted against the bucket's item bytes
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// A change not yet written to the bucket store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyChange {
    Stored(Item),
    Deleted(Bytes),
}

#[derive(Debug, Default)]
pub(crate) struct ItemTable {
    items: BTreeMap<Bytes, Item>,
    dirty: BTreeSet<Bytes>,
    bytes: usize,
}

impl ItemTable {
    pub(crate) fn get(&self, key: &[u8]) -> Option<&Item> {
        self.items.get(key)
    }

    /// Insert or replace an item, returning the previous one
    pub(crate) fn insert(&mut self, item: Item) -> Option<Item> {
        self.dirty.insert(item.key.clone());
        self.restore(item)
    }

    /// Remove an item, returning it if present
    pub(crate) fn remove(&mut self, key: &[u8]) -> Option<Item> {
        let old = self.items.remove(key)?;
        self.bytes -= old.size();
        self.dirty.insert(old.key.clone());
        Some(old)
    }

    /// Insert without marking dirty (replay from the bucket store)
    pub(crate) fn restore(&mut self, item: Item) -> Option<Item> {
        self.bytes += item.size();
        let old = self.items.insert(item.key.clone(), item);
        if let Some(ref old) = old {
            self.bytes -= old.size();
        }
        old
    }

    /// Drain the dirty set into concrete changes
    pub(crate) fn take_dirty(&mut self) -> Vec<DirtyChange> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .map(|key| match self.items.get(&key) {
                Some(item) => DirtyChange::Stored(item.clone()),
                None => DirtyChange::Deleted(key),
            })
            .collect()
    }

    /// Re-mark keys whose changes failed to reach the store
    pub(crate) fn mark_dirty(&mut self, keys: impl IntoIterator<Item = Bytes>) {
        self.dirty.extend(keys);
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn dirty_count(&self) -> usize {
        self.dirty.len()
    }
}
