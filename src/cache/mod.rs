//! Cache Module
//!
//! Cache entries with freshness windows, the bounded in-memory cache, in-flight
//! de-duplication and the cache policy that ties them to the persistent store.

mod entry;
mod inflight;
mod lru;
mod memory;
mod policy;
mod stats;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry, Ttl};
pub use inflight::{Flight, InflightRequests};
pub use lru::LruTracker;
pub use memory::MemoryCache;
pub use policy::{CachePolicy, KeyState};
pub use stats::CacheStats;
