//! `LruTable` — sharded, bounded map with least-recently-used eviction.
//!
//! Each shard owns a slice of the total capacity and a spin lock. Hooks
//! never sleep, so the locks spin rather than park; critical sections are a
//! hash lookup plus an ordered-map update.
//!
//! ```text
//!   key ──hash──▶ shard[i] ──▶ entries: HashMap<K, Slot<V>>
//!                             order:   BTreeMap<tick, K>   (oldest first)
//! ```
//!
//! Capacity is distributed exactly: shard `i` holds
//! `capacity / shards + (i < capacity % shards)` records, so the table as a
//! whole never holds more than `capacity`.

use std::collections::hash_map::RandomState;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::TableError;

struct Slot<V> {
    value: V,
    last_used: u64,
}

struct Shard<K, V> {
    entries: HashMap<K, Slot<V>>,
    order: BTreeMap<u64, K>,
    tick: u64,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> Shard<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            tick: 0,
            capacity,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    /// Mark `key` as most recently used. Returns false if absent.
    fn touch(&mut self, key: &K) -> bool {
        let tick = self.next_tick();
        match self.entries.get_mut(key) {
            Some(slot) => {
                self.order.remove(&slot.last_used);
                slot.last_used = tick;
                self.order.insert(tick, key.clone());
                true
            }
            None => false,
        }
    }

    /// Drop the oldest record. Returns false if the shard is empty.
    fn evict_oldest(&mut self) -> bool {
        let oldest = self.order.keys().next().copied();
        match oldest.and_then(|tick| self.order.remove(&tick)) {
            Some(key) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Insert a key known to be absent, evicting if the shard is full.
    /// The boolean reports whether an eviction happened.
    fn insert_new(&mut self, key: K, value: V) -> Result<bool, TableError> {
        if self.capacity == 0 {
            return Err(TableError::CapacityExhausted { capacity: 0 });
        }
        let mut evicted = false;
        while self.entries.len() >= self.capacity {
            if !self.evict_oldest() {
                return Err(TableError::CapacityExhausted {
                    capacity: self.capacity,
                });
            }
            evicted = true;
        }
        let tick = self.next_tick();
        self.order.insert(tick, key.clone());
        self.entries.insert(
            key,
            Slot {
                value,
                last_used: tick,
            },
        );
        Ok(evicted)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.last_used);
        Some(slot.value)
    }
}

/// Bounded concurrent map with least-recently-used eviction.
pub struct LruTable<K, V> {
    name: &'static str,
    shards: Box<[Mutex<Shard<K, V>>]>,
    hasher: RandomState,
    capacity: usize,
    evictions: AtomicU64,
}

impl<K: Eq + Hash + Clone, V> LruTable<K, V> {
    /// Create a table holding at most `capacity` records spread over
    /// `shards` independently locked shards.
    pub fn new(name: &'static str, capacity: usize, shards: usize) -> Self {
        let shard_count = shards.clamp(1, capacity.max(1));
        let base = capacity / shard_count;
        let extra = capacity % shard_count;

        let shards = (0..shard_count)
            .map(|i| Mutex::new(Shard::new(base + usize::from(i < extra))))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            name,
            shards,
            hasher: RandomState::new(),
            capacity,
            evictions: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let hash = self.hasher.hash_one(key);
        // Shard count is bounded by usize, so the remainder always fits.
        let idx = (hash % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    fn note_eviction(&self, evicted: bool) {
        if evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            log::trace!("{} table evicted its least recently used record", self.name);
        }
    }

    /// Table name used in diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Maximum number of records the table will hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records evicted under capacity pressure since creation.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Current number of records. Approximate while other threads mutate.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Presence check that does not refresh recency.
    pub fn contains(&self, key: &K) -> bool {
        self.shard(key).lock().entries.contains_key(key)
    }

    /// Copy out the record for `key`, marking it most recently used.
    pub fn lookup(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut shard = self.shard(key).lock();
        if !shard.touch(key) {
            return None;
        }
        shard.entries.get(key).map(|slot| slot.value.clone())
    }

    /// Insert or replace the record for `key`. Returns the previous record.
    pub fn update(&self, key: K, value: V) -> Result<Option<V>, TableError> {
        let mut shard = self.shard(&key).lock();
        if shard.touch(&key) {
            let previous = shard
                .entries
                .get_mut(&key)
                .map(|slot| std::mem::replace(&mut slot.value, value));
            return Ok(previous);
        }
        let evicted = shard.insert_new(key, value)?;
        drop(shard);
        self.note_eviction(evicted);
        Ok(None)
    }

    /// Apply `f` to the record for `key` in place, if present.
    pub fn modify<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut shard = self.shard(key).lock();
        if !shard.touch(key) {
            return None;
        }
        shard.entries.get_mut(key).map(|slot| f(&mut slot.value))
    }

    /// Remove the record for `key`. Removing an absent key is not an error.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.shard(key).lock().remove(key)
    }

    /// Remove every record.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.entries.clear();
            shard.order.clear();
        }
    }
}

impl<K, V> std::fmt::Debug for LruTable<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruTable")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("shards", &self.shards.len())
            .finish()
    }
}
