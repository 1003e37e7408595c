//! LRU (Least Recently Used) cache for per-key value sets.
//!
//! A map owns one cache; it lives on the single-threaded read path, so no
//! internal synchronization is needed.

use std::collections::{HashMap, VecDeque};

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Total number of cache lookups
    pub lookups: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }

    /// Reset all statistics to zero
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Fixed-capacity LRU cache from key to its sorted value sequence.
///
/// Uses a HashMap for O(1) lookups and a VecDeque for maintaining LRU
/// order. The cache owns its sequences; `get` clones the stored values out
/// so cached data never aliases a read buffer.
#[derive(Debug)]
pub struct ValueCache {
    /// Maximum number of cached keys
    capacity: usize,
    /// Cached value sequences by key
    entries: HashMap<u64, Vec<u64>>,
    /// LRU queue (most recently used at the back)
    queue: VecDeque<u64>,
    /// Cache statistics
    stats: CacheStats,
}

impl ValueCache {
    /// Create a new ValueCache holding up to `capacity` keys.
    ///
    /// Set `capacity` to 0 to disable caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            queue: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    /// Get the values cached for a key.
    ///
    /// A hit moves the key to the most recently used position.
    pub fn get(&mut self, key: u64) -> Option<Vec<u64>> {
        self.stats.lookups += 1;

        if let Some(values) = self.entries.get(&key) {
            let result = values.clone();
            self.touch(key);
            self.stats.hits += 1;
            Some(result)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Insert a key's value sequence.
    ///
    /// Evicts the least recently used entry when the cache is full.
    pub fn insert(&mut self, key: u64, values: Vec<u64>) {
        if self.capacity == 0 {
            return;
        }

        if self.entries.insert(key, values).is_some() {
            // already present, refresh its position
            self.touch(key);
            return;
        }

        while self.entries.len() > self.capacity {
            self.evict_one();
        }
        self.queue.push_back(key);
        self.stats.insertions += 1;
    }

    /// Move a key to the most recently used position.
    ///
    /// O(n) in the queue length, which is acceptable for the default cache
    /// size; the eviction order only needs to be approximately LRU.
    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.queue.iter().position(|k| *k == key) {
            self.queue.remove(pos);
        }
        self.queue.push_back(key);
    }

    /// Evict the least recently used entry.
    fn evict_one(&mut self) {
        if let Some(key) = self.queue.pop_front() {
            if self.entries.remove(&key).is_some() {
                self.stats.evictions += 1;
            }
        }
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Clear all entries from the cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.queue.clear();
    }

    /// Get the number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the cache capacity in entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
