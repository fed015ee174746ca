//! Cache Statistics Module
//!
//! Counters describing how often reads were served from cache versus the network.

use serde::Serialize;

// == Cache Stats ==
/// Per-service cache and sync counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads answered from a fresh cache entry
    pub hits: u64,
    /// Reads that found no entry or a stale one
    pub misses: u64,
    /// Fetches actually sent upstream (one per in-flight leader)
    pub refreshes: u64,
    /// Reads that joined a fetch already in flight
    pub joins: u64,
    /// Refreshes that ended in an error
    pub failures: u64,
    /// Memory entries dropped by the LRU bound
    pub evictions: u64,
    /// Entries currently held in memory
    pub memory_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates hits / (hits + misses), or 0.0 if nothing was read yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_refresh(&mut self) {
        self.refreshes += 1;
    }

    pub fn record_join(&mut self) {
        self.joins += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }
}
