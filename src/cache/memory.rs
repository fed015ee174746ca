//! In-Memory Cache Module
//!
//! Session-lifetime map from sync key to the last entry read or written, used to
//! skip the persistent store for hot keys. Freshness lives in the stored
//! `CacheEntry`; this map has no TTL of its own.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::cache::{CacheEntry, LruTracker};

// == Memory Cache ==
/// Bounded in-memory cache with LRU eviction.
#[derive(Debug)]
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    entries: HashMap<String, CacheEntry<Value>>,
    lru: LruTracker,
    max_entries: usize,
    evictions: u64,
}

impl MemoryCache {
    // == Constructor ==
    /// Creates an empty cache holding at most `max_entries` keys (minimum 1).
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                max_entries: max_entries.max(1),
                evictions: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // == Includes ==
    /// Checks whether a key is held in memory.
    pub fn includes(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    // == Get ==
    /// Returns a clone of the entry for `key` and marks it recently used.
    pub fn get(&self, key: &str) -> Option<CacheEntry<Value>> {
        let mut inner = self.lock();
        let entry = inner.entries.get(key).cloned()?;
        inner.lru.touch(key);
        Some(entry)
    }

    // == Put ==
    /// Stores an entry, evicting the least recently used key when full.
    pub fn put(&self, key: &str, entry: CacheEntry<Value>) {
        let mut inner = self.lock();

        if !inner.entries.contains_key(key) && inner.entries.len() >= inner.max_entries {
            if let Some(evicted) = inner.lru.evict_oldest() {
                inner.entries.remove(&evicted);
                inner.evictions += 1;
            }
        }

        inner.entries.insert(key.to_string(), entry);
        inner.lru.touch(key);
    }

    // == Remove ==
    /// Drops a key. Returns true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.lock();
        inner.lru.remove(key);
        inner.entries.remove(key).is_some()
    }

    // == Remove Prefix ==
    /// Drops every key starting with `prefix`, returning how many were removed.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.lock();
        let doomed: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &doomed {
            inner.entries.remove(key);
            inner.lru.remove(key);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of entries dropped by the capacity bound so far.
    pub fn evictions(&self) -> u64 {
        self.lock().evictions
    }
}
