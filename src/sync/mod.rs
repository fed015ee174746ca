//! Sync Module
//!
//! The shape shared by every platform integration: a `SyncService` trait, the
//! record merge rules, and the incremental refresh routine composed from the
//! cache policy and a platform fetch.

mod context;
mod merge;
mod stream;

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cache::{CachePolicy, CacheStats, KeyState, Ttl};
use crate::error::Result;

pub use context::{CancelHandle, CancelToken, SyncContext, SyncProgress};
pub use merge::{merge_records, HighWaterMark, SyncRecord};
pub use stream::{stream_collection, SyncEvent};

// == Sync Service ==
/// Uniform surface of a per-platform sync service.
#[async_trait]
pub trait SyncService: Send + Sync {
    type Credentials: Send + 'static;
    type Profile: Send + 'static;
    type Record: Send + 'static;

    /// Short platform name, also the sync-key namespace.
    fn platform(&self) -> &'static str;

    /// Validates credentials against the upstream and keeps them for later calls.
    async fn login(&self, credentials: Self::Credentials) -> Result<Self::Profile>;

    /// Forgets stored credentials. Cached collections are kept.
    async fn logout(&self);

    /// Returns the named collection, served from cache while fresh.
    async fn get_collection(&self, name: &str) -> Result<Vec<Self::Record>> {
        self.get_collection_with(name, &SyncContext::detached()).await
    }

    /// As [`SyncService::get_collection`], under a caller-supplied context.
    async fn get_collection_with(
        &self,
        name: &str,
        ctx: &SyncContext,
    ) -> Result<Vec<Self::Record>>;

    /// Deletes every cached collection of this platform.
    async fn flush_cache(&self) -> Result<()>;

    /// Lifecycle state of a collection's cache entry.
    async fn collection_state(&self, name: &str) -> Result<KeyState>;

    fn cache_stats(&self) -> CacheStats;
}

// == Sync Keys ==
/// Builds the sync key of a collection: `<platform>-<collection>`.
pub fn sync_key(platform: &str, collection: &str) -> String {
    format!("{}-{}", platform, collection)
}

/// Prefix shared by every sync key of `platform`.
pub fn platform_prefix(platform: &str) -> String {
    format!("{}-", platform)
}

// == Incremental Refresh ==
/// Reads `key` through the cache policy; on refresh, calls `fetch` with the
/// high-water mark of the cached records (`None` when nothing is cached) and
/// merges what it returns into them.
pub async fn sync_records<R, F, Fut>(
    policy: &CachePolicy,
    key: &str,
    ttl: Ttl,
    ctx: &SyncContext,
    fetch: F,
) -> Result<Vec<R>>
where
    R: SyncRecord + Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce(Option<HighWaterMark>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<R>>> + Send + 'static,
{
    let owned_key = key.to_string();
    policy
        .get_or_fetch(key, ttl, ctx, move |cached: Option<Vec<R>>| async move {
            let cached = cached.unwrap_or_default();
            let mark = HighWaterMark::of(&cached);
            let incoming = fetch(mark).await?;
            debug!(
                "'{}': merging {} new records into {} cached",
                owned_key,
                incoming.len(),
                cached.len()
            );
            Ok(merge_records(cached, incoming))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::merge::tests::{stamp, Stamp};
    use super::*;
    use crate::cache::{current_timestamp_ms, CacheEntry};
    use crate::store::InMemoryStore;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_sync_key_format() {
        assert_eq!(sync_key("anki", "reviews-Core"), "anki-reviews-Core");
        assert_eq!(platform_prefix("wanikani"), "wanikani-");
    }

    #[tokio::test]
    async fn test_refresh_after_ttl_fetches_from_high_water_mark() {
        let store = Arc::new(InMemoryStore::new());
        let policy = CachePolicy::new(store, 8);
        let cached = vec![stamp(1, 100), stamp(2, 200), stamp(3, 300)];
        let last_updated = current_timestamp_ms() - 120_000;
        policy
            .seed(
                "deck-a",
                CacheEntry::with_timestamp(serde_json::to_value(&cached).unwrap(), last_updated),
            )
            .await
            .unwrap();

        let seen_mark = Arc::new(Mutex::new(None));
        let seen = seen_mark.clone();
        let merged: Vec<Stamp> = sync_records(
            &policy,
            "deck-a",
            Ttl::Millis(60_000),
            &SyncContext::detached(),
            move |mark| async move {
                *seen.lock().unwrap() = mark;
                Ok(vec![stamp(4, 400), stamp(5, 500)])
            },
        )
        .await
        .unwrap();

        assert_eq!(
            merged.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(seen_mark.lock().unwrap().map(|m| m.max_id), Some(3));

        let entry = policy.read_entry("deck-a").await.unwrap().unwrap();
        assert!(entry.last_updated > last_updated);
    }

    #[tokio::test]
    async fn test_empty_cache_fetches_without_mark() {
        let policy = CachePolicy::new(Arc::new(InMemoryStore::new()), 8);

        let merged: Vec<Stamp> = sync_records(
            &policy,
            "k",
            Ttl::Millis(60_000),
            &SyncContext::detached(),
            |mark| async move {
                assert!(mark.is_none());
                Ok(vec![stamp(2, 20), stamp(1, 10), stamp(2, 20)])
            },
        )
        .await
        .unwrap();

        assert_eq!(merged, vec![stamp(1, 10), stamp(2, 20)]);
    }
}
