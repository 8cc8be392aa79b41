//! Bounded in-memory map with least-recently-used eviction
//!
//! Recency is a monotonically increasing stamp per entry. `order` maps
//! stamps back to keys, so the least recently used entry is always the
//! first one in `order`. Entries inserted back to back (the load at attach)
//! therefore leave in insertion order, which keeps eviction reproducible.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::num::NonZeroUsize;

/// LRU cache with a fixed capacity
#[derive(Debug)]
pub struct EvictionCache<K, V> {
    capacity: NonZeroUsize,

    /// key -> value and its current recency stamp
    entries: HashMap<K, Slot<V>>,

    /// recency stamp -> key, oldest first
    order: BTreeMap<u64, K>,

    next_stamp: u64,
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    stamp: u64,
}

impl<K, V> EvictionCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.get()),
            order: BTreeMap::new(),
            next_stamp: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up a key and mark it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let stamp = self.bump();
        let slot = self.entries.get_mut(key)?;
        self.order.remove(&slot.stamp);
        slot.stamp = stamp;
        self.order.insert(stamp, key.clone());
        Some(&slot.value)
    }

    /// Look up a key without touching its recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Insert or update a key, marking it most recently used
    ///
    /// Updating an existing key never evicts. Inserting a new key into a
    /// full cache evicts the least recently used entry first and returns it.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        let stamp = self.bump();

        if let Some(slot) = self.entries.get_mut(&key) {
            self.order.remove(&slot.stamp);
            slot.stamp = stamp;
            slot.value = value;
            self.order.insert(stamp, key);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity.get() {
            self.pop_lru()
        } else {
            None
        };

        self.order.insert(stamp, key.clone());
        self.entries.insert(key, Slot { value, stamp });
        evicted
    }

    /// Remove a key regardless of recency
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.stamp);
        Some(slot.value)
    }

    /// Remove and return the least recently used entry
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.entries.remove(&key)?;
        Some((key, slot.value))
    }

    /// All entries, least recently used first
    pub fn entries(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.order.values().filter_map(move |key| {
            self.entries.get(key).map(|slot| (key, &slot.value))
        })
    }

    /// Consume the cache, returning entries least recently used first
    pub fn into_entries(mut self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.pop_lru() {
            out.push(entry);
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn bump(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }
}
