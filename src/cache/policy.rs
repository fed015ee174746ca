//! Cache Policy Module
//!
//! Stale-while-fresh reads over the persistent store: serve a cached entry while
//! it is inside its TTL, otherwise run the supplied fetch (handing it the stale
//! data for incremental merges), persist the result and return it.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::cache::{
    current_timestamp_ms, CacheEntry, CacheStats, Flight, InflightRequests, MemoryCache, Ttl,
};
use crate::error::{Result, SyncError};
use crate::store::PersistentStore;
use crate::sync::SyncContext;

// == Key State ==
/// Lifecycle state of one sync key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// No entry stored
    Empty,
    /// A refresh is in flight
    Syncing,
    /// Entry is inside its TTL
    Fresh,
    /// Entry exists but its TTL has elapsed
    Stale,
}

// == Cache Policy ==
/// Owns all reads and writes of cache entries for one sync service.
///
/// Each service gets its own memory cache and in-flight table; the persistent
/// store handle is shared across services.
pub struct CachePolicy {
    store: Arc<dyn PersistentStore>,
    memory: Arc<MemoryCache>,
    inflight: Arc<InflightRequests>,
    /// Held while a refresh result is written and while keys are flushed, so a
    /// flush never interleaves with a write.
    persist_gate: Arc<AsyncMutex<()>>,
    stats: Mutex<CacheStats>,
}

impl std::fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePolicy")
            .field("memory", &self.memory)
            .field("inflight", &self.inflight)
            .finish_non_exhaustive()
    }
}

impl CachePolicy {
    // == Constructor ==
    /// Creates a policy over `store` with a memory cache of `memory_entries` keys.
    pub fn new(store: Arc<dyn PersistentStore>, memory_entries: usize) -> Self {
        Self {
            store,
            memory: Arc::new(MemoryCache::new(memory_entries)),
            inflight: Arc::new(InflightRequests::new()),
            persist_gate: Arc::new(AsyncMutex::new(())),
            stats: Mutex::new(CacheStats::new()),
        }
    }

    fn stats_mut(&self) -> MutexGuard<'_, CacheStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of this policy's counters.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats_mut().clone();
        stats.evictions = self.memory.evictions();
        stats.memory_entries = self.memory.len();
        stats
    }

    // == Read Entry ==
    /// Loads the entry for `key`, preferring memory over the persistent store.
    ///
    /// An undecodable persisted entry is deleted and reported as absent, which
    /// forces a full resync instead of serving corrupt data.
    pub async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry<Value>>> {
        if let Some(entry) = self.memory.get(key) {
            return Ok(Some(entry));
        }

        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_value::<CacheEntry<Value>>(raw) {
            Ok(entry) => {
                self.memory.put(key, entry.clone());
                Ok(Some(entry))
            }
            Err(e) => {
                warn!("Discarding corrupt cache entry '{}': {}", key, e);
                self.store.remove(key).await?;
                Ok(None)
            }
        }
    }

    // == Key State ==
    /// Reports where `key` sits in the Empty/Syncing/Fresh/Stale cycle.
    pub async fn key_state(&self, key: &str, ttl: Ttl) -> Result<KeyState> {
        if self.inflight.contains(key) {
            return Ok(KeyState::Syncing);
        }
        Ok(match self.read_entry(key).await? {
            None => KeyState::Empty,
            Some(entry) if entry.is_fresh(ttl, current_timestamp_ms()) => KeyState::Fresh,
            Some(_) => KeyState::Stale,
        })
    }

    // == Get Or Fetch ==
    /// Returns cached data for `key` if fresh under `ttl`; otherwise refreshes it.
    ///
    /// `fetch` receives the previously cached data (if any, even when stale) and
    /// must return the complete new collection. Concurrent callers for the same
    /// key share a single refresh; the first caller's context governs it. If
    /// that context is cancelled once the fetch resolves, nothing is persisted,
    /// and joiners whose own context is still live start a refresh of their own.
    ///
    /// A refresh whose key is flushed or invalidated while it runs still
    /// answers its callers but leaves the cache untouched.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Ttl,
        ctx: &SyncContext,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(Option<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let cached = self.read_entry(key).await?;

        if let Some(entry) = &cached {
            if entry.is_fresh(ttl, current_timestamp_ms()) {
                debug!(
                    "Cache hit for '{}' (age {}ms)",
                    key,
                    entry.age_ms(current_timestamp_ms())
                );
                self.stats_mut().record_hit();
                return Ok(serde_json::from_value(entry.data.clone())?);
            }
        }
        self.stats_mut().record_miss();

        let previous = match cached {
            Some(entry) => match serde_json::from_value::<T>(entry.data) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(
                        "Cached data for '{}' no longer decodes, refetching in full: {}",
                        key, e
                    );
                    None
                }
            },
            None => None,
        };

        let owned_key = key.to_string();
        let store = Arc::clone(&self.store);
        let memory = Arc::clone(&self.memory);
        let inflight = Arc::clone(&self.inflight);
        let gate = Arc::clone(&self.persist_gate);
        let governing = ctx.clone();

        let mut start = move |generation: u64| async move {
            let incremental = previous.is_some();
            info!(
                "Refreshing '{}' ({})",
                owned_key,
                if incremental { "incremental" } else { "full" }
            );

            let data = fetch(previous).await?;
            governing.check_cancelled()?;

            let value = serde_json::to_value(&data)?;
            let entry = CacheEntry::new(value);

            let _persisting = gate.lock().await;
            if !inflight.is_current(&owned_key, generation) {
                info!("'{}' was flushed mid-refresh, result not cached", owned_key);
                return Ok::<Value, SyncError>(entry.data);
            }
            store.set(&owned_key, serde_json::to_value(&entry)?).await?;
            memory.put(&owned_key, entry.clone());

            debug!("Persisted '{}' at {}", owned_key, entry.last_updated);
            Ok::<Value, SyncError>(entry.data)
        };

        let flight = loop {
            match self.inflight.run(key, start).await {
                (Flight::Joined(Err(SyncError::Cancelled)), Some(unused))
                    if !ctx.is_cancelled() =>
                {
                    debug!("Shared refresh of '{}' was cancelled, retrying", key);
                    start = unused;
                }
                (flight, _) => break flight,
            }
        };

        {
            let mut stats = self.stats_mut();
            match &flight {
                Flight::Joined(_) => stats.record_join(),
                Flight::Led(Ok(_)) => stats.record_refresh(),
                Flight::Led(Err(_)) => {
                    stats.record_refresh();
                    stats.record_failure();
                }
            }
        }

        let value = flight.into_inner()?;
        Ok(serde_json::from_value(value)?)
    }

    // == Invalidate ==
    /// Deletes a single key from memory and the persistent store. A refresh
    /// of `key` already running is detached and will not write its result.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let _persisting = self.persist_gate.lock().await;
        self.inflight.detach(key);
        self.memory.remove(key);
        self.store.remove(key).await
    }

    // == Flush Prefix ==
    /// Deletes every key beginning with `prefix`; returns how many persisted
    /// keys were removed.
    pub async fn flush_prefix(&self, prefix: &str) -> Result<usize> {
        let _persisting = self.persist_gate.lock().await;
        let detached = self.inflight.detach_prefix(prefix);
        if detached > 0 {
            debug!("Detached {} running refreshes under '{}'", detached, prefix);
        }
        self.memory.remove_prefix(prefix);

        let doomed: Vec<String> = self
            .store
            .keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();

        for key in &doomed {
            self.store.remove(key).await?;
        }

        info!(
            "Flushed {} cached collections under '{}'",
            doomed.len(),
            prefix
        );
        Ok(doomed.len())
    }

    /// Write an entry directly, bypassing the fetch path.
    #[cfg(test)]
    pub(crate) async fn seed(&self, key: &str, entry: CacheEntry<Value>) -> Result<()> {
        self.store.set(key, serde_json::to_value(&entry)?).await
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::store::InMemoryStore;
    use crate::sync::CancelToken;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn policy() -> (Arc<InMemoryStore>, CachePolicy) {
        let store = Arc::new(InMemoryStore::new());
        let policy = CachePolicy::new(store.clone(), 16);
        (store, policy)
    }

    type Ready = futures_util::future::Ready<Result<Vec<i64>>>;

    fn counting(
        calls: &Arc<AtomicUsize>,
        data: Vec<i64>,
    ) -> impl FnOnce(Option<Vec<i64>>) -> Ready {
        let calls = calls.clone();
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            futures_util::future::ready(Ok(data))
        }
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_fetch() {
        let (_, policy) = policy();
        let now = current_timestamp_ms();
        policy
            .seed(
                "k",
                CacheEntry::with_timestamp(serde_json::json!([1, 2]), now - 1_000),
            )
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let ctx = SyncContext::detached();
        let data: Vec<i64> = policy
            .get_or_fetch("k", Ttl::Millis(60_000), &ctx, counting(&calls, vec![9]))
            .await
            .unwrap();

        assert_eq!(data, vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(policy.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_fetches_once_and_persists() {
        let (store, policy) = policy();
        let stale_at = current_timestamp_ms() - 70_000;
        policy
            .seed("k", CacheEntry::with_timestamp(serde_json::json!([1]), stale_at))
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let ctx = SyncContext::detached();
        let data: Vec<i64> = policy
            .get_or_fetch("k", Ttl::Millis(60_000), &ctx, counting(&calls, vec![1, 2]))
            .await
            .unwrap();

        assert_eq!(data, vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let raw = store.get("k").await.unwrap().unwrap();
        let entry: CacheEntry<Vec<i64>> = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.data, vec![1, 2]);
        assert!(entry.last_updated > stale_at);
    }

    #[tokio::test]
    async fn test_fetch_receives_stale_data() {
        let (_, policy) = policy();
        policy
            .seed("k", CacheEntry::with_timestamp(serde_json::json!([1, 2, 3]), 0))
            .await
            .unwrap();

        let extend = |previous: Option<Vec<i64>>| async move {
            let mut data = previous.unwrap_or_default();
            data.extend([4, 5]);
            Ok(data)
        };
        let data: Vec<i64> = policy
            .get_or_fetch("k", Ttl::Millis(1), &SyncContext::detached(), extend)
            .await
            .unwrap();

        assert_eq!(data, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_never_ttl_does_not_refetch() {
        let (_, policy) = policy();
        policy
            .seed("k", CacheEntry::with_timestamp(serde_json::json!([7]), 0))
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let data: Vec<i64> = policy
            .get_or_fetch("k", Ttl::Never, &SyncContext::detached(), counting(&calls, vec![8]))
            .await
            .unwrap();

        assert_eq!(data, vec![7]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_fetch() {
        let (_, policy) = policy();
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = |calls: Arc<AtomicUsize>| {
            move |_: Option<Vec<i64>>| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(vec![42])
            }
        };

        let ctx = SyncContext::detached();
        let ttl = Ttl::Millis(60_000);
        let (a, b) = tokio::join!(
            policy.get_or_fetch::<Vec<i64>, _, _>("k", ttl, &ctx, slow(calls.clone())),
            policy.get_or_fetch::<Vec<i64>, _, _>("k", ttl, &ctx, slow(calls.clone()))
        );

        assert_eq!(a.unwrap(), vec![42]);
        assert_eq!(b.unwrap(), vec![42]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = policy.stats();
        assert_eq!(stats.refreshes, 1);
        assert_eq!(stats.joins, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates_and_nothing_persisted() {
        let (store, policy) = policy();

        let result: Result<Vec<i64>> = policy
            .get_or_fetch("k", Ttl::Millis(60_000), &SyncContext::detached(), |_| async {
                Err(SyncError::Parse("truncated page".to_string()))
            })
            .await;

        assert_eq!(result, Err(SyncError::Parse("truncated page".to_string())));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(policy.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_is_not_persisted() {
        let (store, policy) = policy();
        let (handle, token) = CancelToken::new();
        let ctx = SyncContext::with_cancel(token);

        let result: Result<Vec<i64>> = policy
            .get_or_fetch("k", Ttl::Millis(60_000), &ctx, move |_| async move {
                handle.cancel();
                Ok(vec![1])
            })
            .await;

        assert_err!(result.clone());
        assert_eq!(result, Err(SyncError::Cancelled));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_discarded() {
        let (store, policy) = policy();
        store.set("k", serde_json::json!({"unexpected": true})).await.unwrap();

        let fetch = |previous: Option<Vec<i64>>| async move {
            assert!(previous.is_none());
            Ok(vec![3])
        };
        let data: Vec<i64> = assert_ok!(
            policy
                .get_or_fetch("k", Ttl::Millis(60_000), &SyncContext::detached(), fetch)
                .await
        );
        assert_eq!(data, vec![3]);
    }

    #[tokio::test]
    async fn test_key_state_transitions() {
        let (_, policy) = policy();
        let ttl = Ttl::Millis(60_000);
        assert_eq!(policy.key_state("k", ttl).await.unwrap(), KeyState::Empty);

        let _: Vec<i64> = policy
            .get_or_fetch("k", ttl, &SyncContext::detached(), |_| async { Ok(vec![1]) })
            .await
            .unwrap();
        assert_eq!(policy.key_state("k", ttl).await.unwrap(), KeyState::Fresh);
        assert_eq!(
            policy.key_state("k", Ttl::Millis(0)).await.unwrap(),
            KeyState::Stale
        );
    }

    #[tokio::test]
    async fn test_flush_prefix() {
        let (store, policy) = policy();
        for key in ["anki-reviews-A", "anki-reviews-B", "wanikani-reviews"] {
            let _: Vec<i64> = policy
                .get_or_fetch(key, Ttl::Never, &SyncContext::detached(), |_| async { Ok(vec![1]) })
                .await
                .unwrap();
        }

        assert_eq!(policy.flush_prefix("anki-").await.unwrap(), 2);
        assert_eq!(store.get("anki-reviews-A").await.unwrap(), None);
        assert_eq!(store.get("anki-reviews-B").await.unwrap(), None);
        assert!(store.get("wanikani-reviews").await.unwrap().is_some());
        assert_eq!(
            policy.key_state("anki-reviews-A", Ttl::Never).await.unwrap(),
            KeyState::Empty
        );
    }

    #[tokio::test]
    async fn test_flush_during_refresh_is_not_overwritten() {
        let (store, policy) = policy();
        policy
            .seed("k", CacheEntry::with_timestamp(serde_json::json!([1, 2, 3]), 0))
            .await
            .unwrap();
        let ctx = SyncContext::detached();

        let slow_append = |previous: Option<Vec<i64>>| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut data = previous.unwrap_or_default();
            data.push(4);
            Ok(data)
        };
        let refresh = policy.get_or_fetch::<Vec<i64>, _, _>("k", Ttl::Millis(1), &ctx, slow_append);

        let flush_then_read = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(policy.flush_prefix("k").await.unwrap(), 1);
            assert_eq!(policy.key_state("k", Ttl::Never).await.unwrap(), KeyState::Empty);

            let full = |previous: Option<Vec<i64>>| async move {
                assert!(previous.is_none());
                Ok(vec![100])
            };
            policy
                .get_or_fetch::<Vec<i64>, _, _>("k", Ttl::Millis(60_000), &ctx, full)
                .await
        };

        let (old, fresh) = tokio::join!(refresh, flush_then_read);

        assert_eq!(old.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(fresh.unwrap(), vec![100]);
        let raw = store.get("k").await.unwrap().unwrap();
        let entry: CacheEntry<Vec<i64>> = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.data, vec![100]);

        let cached: Vec<i64> = policy
            .get_or_fetch("k", Ttl::Never, &ctx, |_| async { Ok(vec![0]) })
            .await
            .unwrap();
        assert_eq!(cached, vec![100]);
    }

    #[tokio::test]
    async fn test_invalidate_during_refresh_is_not_overwritten() {
        let (store, policy) = policy();
        let ctx = SyncContext::detached();

        let slow = |_: Option<Vec<i64>>| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(vec![5])
        };
        let (refreshed, _) = tokio::join!(
            policy.get_or_fetch::<Vec<i64>, _, _>("k", Ttl::Never, &ctx, slow),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                policy.invalidate("k").await.unwrap();
            }
        );

        assert_eq!(refreshed.unwrap(), vec![5]);
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(policy.key_state("k", Ttl::Never).await.unwrap(), KeyState::Empty);
    }

    #[tokio::test]
    async fn test_leader_cancel_does_not_fail_joiner() {
        let (store, policy) = policy();
        let calls = Arc::new(AtomicUsize::new(0));
        let (handle, token) = CancelToken::new();
        let leader_ctx = SyncContext::with_cancel(token);
        let joiner_ctx = SyncContext::detached();

        let slow = |calls: Arc<AtomicUsize>| {
            move |_: Option<Vec<i64>>| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(vec![7])
            }
        };

        let ttl = Ttl::Millis(60_000);
        let (led, joined, _) = tokio::join!(
            policy.get_or_fetch::<Vec<i64>, _, _>("k", ttl, &leader_ctx, slow(calls.clone())),
            policy.get_or_fetch::<Vec<i64>, _, _>("k", ttl, &joiner_ctx, slow(calls.clone())),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                handle.cancel();
            }
        );

        assert_eq!(led, Err(SyncError::Cancelled));
        assert_eq!(joined.unwrap(), vec![7]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let raw = store.get("k").await.unwrap().unwrap();
        let entry: CacheEntry<Vec<i64>> = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.data, vec![7]);
    }

    #[tokio::test]
    async fn test_cancelled_joiner_does_not_retry() {
        let (_, policy) = policy();
        let calls = Arc::new(AtomicUsize::new(0));
        let (handle, token) = CancelToken::new();
        let ctx = SyncContext::with_cancel(token);

        let slow = |calls: Arc<AtomicUsize>| {
            move |_: Option<Vec<i64>>| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(vec![1])
            }
        };

        let ttl = Ttl::Millis(60_000);
        let (a, b, _) = tokio::join!(
            policy.get_or_fetch::<Vec<i64>, _, _>("k", ttl, &ctx, slow(calls.clone())),
            policy.get_or_fetch::<Vec<i64>, _, _>("k", ttl, &ctx, slow(calls.clone())),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                handle.cancel();
            }
        );

        assert_eq!(a, Err(SyncError::Cancelled));
        assert_eq!(b, Err(SyncError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
