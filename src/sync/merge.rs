//! Record identity, high-water marks and merge.

use std::collections::BTreeMap;

// == Sync Record ==
/// A record the upstream identifies by an integer id and orders by time.
pub trait SyncRecord {
    /// Upstream-assigned identity
    fn record_id(&self) -> i64;

    /// Ordering timestamp in Unix milliseconds (review time, creation time)
    fn timestamp_ms(&self) -> i64;

    /// Last modification time in Unix milliseconds. Immutable records keep
    /// the default, which is their ordering timestamp.
    fn updated_ms(&self) -> i64 {
        self.timestamp_ms()
    }
}

// == High-Water Mark ==
/// Latest id and timestamps seen in a cached collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighWaterMark {
    pub max_id: i64,
    pub max_timestamp_ms: i64,
    pub max_updated_ms: i64,
}

impl HighWaterMark {
    /// Derives the mark from `records`; `None` for an empty collection.
    pub fn of<R: SyncRecord>(records: &[R]) -> Option<Self> {
        let first = records.first()?;
        let seed = HighWaterMark {
            max_id: first.record_id(),
            max_timestamp_ms: first.timestamp_ms(),
            max_updated_ms: first.updated_ms(),
        };

        Some(records.iter().skip(1).fold(seed, |mark, record| HighWaterMark {
            max_id: mark.max_id.max(record.record_id()),
            max_timestamp_ms: mark.max_timestamp_ms.max(record.timestamp_ms()),
            max_updated_ms: mark.max_updated_ms.max(record.updated_ms()),
        }))
    }
}

// == Merge ==
/// Merges `incoming` into `existing`.
///
/// Records are keyed by id with the incoming copy winning, then sorted
/// ascending by `(timestamp, id)`. Re-merging overlapping ranges never yields
/// duplicates or out-of-order records.
pub fn merge_records<R: SyncRecord>(existing: Vec<R>, incoming: Vec<R>) -> Vec<R> {
    let mut by_id: BTreeMap<i64, R> = BTreeMap::new();
    for record in existing.into_iter().chain(incoming) {
        by_id.insert(record.record_id(), record);
    }

    let mut merged: Vec<R> = by_id.into_values().collect();
    merged.sort_by_key(|record| (record.timestamp_ms(), record.record_id()));
    merged
}
