//! Fixed-capacity TTL+LRU cache. A single mutex guards both the map and
//! its MRU ordering, since `get` and `put` both need to mutate that order.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Cumulative hit/miss counters plus the current size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

struct Counters {
    hits: u64,
    misses: u64,
}

/// A bounded cache with time-to-live expiry and least-recently-used
/// eviction. `capacity == 0` disables caching entirely: every `get` misses
/// and every `put` is a no-op.
pub struct QueryCache<V> {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<IndexMap<String, Entry<V>>>,
    counters: Mutex<Counters>,
}

impl<V: Clone> QueryCache<V> {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(IndexMap::new()),
            counters: Mutex::new(Counters { hits: 0, misses: 0 }),
        }
    }

    /// Returns the value for `key` if present and unexpired, promoting it
    /// to most-recently-used and incrementing the hit counter. On a miss
    /// (absent or expired), increments the miss counter and evicts the
    /// expired entry if one was found.
    pub fn get(&self, key: &str) -> Option<V> {
        if self.capacity == 0 {
            self.counters.lock().misses += 1;
            return None;
        }
        let mut entries = self.entries.lock();
        let hit = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => true,
            Some(_) => {
                entries.shift_remove(key);
                false
            }
            None => false,
        };

        if hit {
            let (_, entry) = entries.shift_remove_entry(key).expect("checked present above");
            let value = entry.value.clone();
            entries.insert(key.to_string(), entry);
            drop(entries);
            self.counters.lock().hits += 1;
            Some(value)
        } else {
            drop(entries);
            self.counters.lock().misses += 1;
            None
        }
    }

    /// Inserts or updates `key`, moving it to most-recently-used and
    /// evicting the least-recently-used entry if this put exceeds capacity.
    pub fn put(&self, key: String, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        entries.shift_remove(&key);
        entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        while entries.len() > self.capacity {
            entries.shift_remove_index(0);
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.lock().shift_remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let counters = self.counters.lock();
        let total = counters.hits + counters.misses;
        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            size: self.entries.lock().len(),
            hit_rate: if total == 0 { 0.0 } else { counters.hits as f64 / total as f64 },
        }
    }
}
