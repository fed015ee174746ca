//! Cache Entry Module
//!
//! Defines the persisted `{data, lastUpdated}` envelope and the freshness window
//! used to decide whether it may be served without a network call.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// A cached collection together with the time it was last written.
///
/// Serialized as `{"data": ..., "lastUpdated": <unix ms>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    /// The cached payload
    pub data: T,
    /// Wall-clock time (Unix milliseconds) at which `data` was written
    pub last_updated: i64,
}

impl<T> CacheEntry<T> {
    // == Constructor ==
    /// Creates an entry stamped with the current time.
    pub fn new(data: T) -> Self {
        Self::with_timestamp(data, current_timestamp_ms())
    }

    /// Creates an entry with an explicit `last_updated` timestamp.
    pub fn with_timestamp(data: T, last_updated: i64) -> Self {
        Self { data, last_updated }
    }

    // == Age ==
    /// Milliseconds elapsed between `last_updated` and `now`, clamped at zero.
    pub fn age_ms(&self, now: i64) -> u64 {
        now.saturating_sub(self.last_updated).max(0) as u64
    }

    // == Freshness ==
    /// Checks whether the entry may be served under `ttl` at time `now`.
    pub fn is_fresh(&self, ttl: Ttl, now: i64) -> bool {
        ttl.is_fresh(self.age_ms(now))
    }

    /// Maps the payload, keeping the timestamp.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            data: f(self.data),
            last_updated: self.last_updated,
        }
    }
}

// == TTL ==
/// Freshness window for a cached collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Entry is fresh while its age is strictly below this many milliseconds
    Millis(u64),
    /// Entry never goes stale on its own; only an explicit flush refreshes it
    Never,
}

impl Ttl {
    /// Raw value that selects [`Ttl::Never`].
    pub const NEVER_SENTINEL: i64 = -1;

    /// Builds a TTL from signed milliseconds. Negative values mean "never expire".
    pub fn from_millis(ms: i64) -> Self {
        if ms < 0 {
            Ttl::Never
        } else {
            Ttl::Millis(ms as u64)
        }
    }

    /// Returns the signed millisecond form, `-1` for [`Ttl::Never`].
    pub fn as_millis(&self) -> i64 {
        match self {
            Ttl::Millis(ms) => i64::try_from(*ms).unwrap_or(i64::MAX),
            Ttl::Never => Self::NEVER_SENTINEL,
        }
    }

    /// Whether data of the given age is still fresh.
    pub fn is_fresh(&self, age_ms: u64) -> bool {
        match self {
            Ttl::Millis(ttl) => age_ms < *ttl,
            Ttl::Never => true,
        }
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        Ttl::Millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}
