//! Photo Byte Cache
//!
//! Bounded in-memory cache of raw fetched bytes, keyed by locator and
//! evicted least-recently-used by total bytes stored. Entries are
//! inserted only when a cache-enabled request reaches its terminal
//! complete state; a duplicate insert for the same key is
//! last-writer-wins.

use std::collections::HashMap;

use crate::key::PhotoKey;

/// Default capacity: 4 MiB of raw photo bytes.
pub const DEFAULT_CACHE_CAPACITY: usize = 4 * 1024 * 1024;

struct CacheEntry {
    bytes: Vec<u8>,
    last_used: u64,
}

/// LRU byte cache, bounded by total stored bytes.
pub struct PhotoCache {
    entries: HashMap<PhotoKey, CacheEntry>,
    capacity: usize,
    current_size: usize,
    // Monotonic access counter; avoids Instant ties under rapid access.
    tick: u64,
}

impl PhotoCache {
    /// Create a cache bounded to `capacity` total bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            current_size: 0,
            tick: 0,
        }
    }

    /// Fetch the bytes for `key`, refreshing its recency.
    pub fn get(&mut self, key: &PhotoKey) -> Option<Vec<u8>> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(entry.bytes.clone())
    }

    /// Store `bytes` under `key`, evicting least-recently-used entries
    /// until the total fits. Entries larger than the whole cache are
    /// rejected.
    pub fn put(&mut self, key: PhotoKey, bytes: Vec<u8>) {
        let size = bytes.len();
        if size > self.capacity {
            tracing::debug!("not caching {key}: {size} bytes exceeds capacity");
            return;
        }

        if let Some(existing) = self.entries.remove(&key) {
            self.current_size -= existing.bytes.len();
        }

        while self.current_size + size > self.capacity {
            if !self.evict_one() {
                break;
            }
        }

        self.tick += 1;
        self.current_size += size;
        self.entries.insert(
            key,
            CacheEntry {
                bytes,
                last_used: self.tick,
            },
        );
    }

    pub fn contains(&self, key: &PhotoKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes currently stored.
    pub fn total_bytes(&self) -> usize {
        self.current_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_one(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());

        if let Some(key) = oldest {
            if let Some(entry) = self.entries.remove(&key) {
                tracing::debug!("evicting {key} ({} bytes)", entry.bytes.len());
                self.current_size -= entry.bytes.len();
                return true;
            }
        }
        false
    }
}

impl Default for PhotoCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
