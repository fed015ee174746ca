//! In-Flight Request Module
//!
//! Single-flight de-duplication: while a refresh for a sync key is running,
//! later callers for the same key await that refresh instead of starting their
//! own, and all of them observe the same value or the same error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::error::Result;

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

// == Flight Outcome ==
/// How a caller obtained its result.
#[derive(Debug, Clone, PartialEq)]
pub enum Flight<V> {
    /// This caller started the fetch
    Led(V),
    /// This caller awaited a fetch someone else started
    Joined(V),
}

impl<V> Flight<V> {
    pub fn into_inner(self) -> V {
        match self {
            Flight::Led(v) | Flight::Joined(v) => v,
        }
    }

    pub fn was_joined(&self) -> bool {
        matches!(self, Flight::Joined(_))
    }
}

// == In-Flight Requests ==
/// Map of sync key to the shared future currently refreshing it.
#[derive(Default)]
pub struct InflightRequests {
    pending: Mutex<HashMap<String, (u64, SharedFetch)>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for InflightRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.lock().keys().cloned().collect();
        f.debug_struct("InflightRequests")
            .field("pending", &keys)
            .finish()
    }
}

impl InflightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (u64, SharedFetch)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // == Contains ==
    /// Whether a refresh for `key` is currently running.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `generation` is still the registered flight for `key`.
    pub fn is_current(&self, key: &str, generation: u64) -> bool {
        matches!(self.lock().get(key), Some((current, _)) if *current == generation)
    }

    // == Detach ==
    /// Forgets the flight for `key` without stopping it. Callers already
    /// awaiting it still get its result; later callers start a new one.
    pub fn detach(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Detaches every flight whose key starts with `prefix`.
    pub fn detach_prefix(&self, prefix: &str) -> usize {
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|key, _| !key.starts_with(prefix));
        before - pending.len()
    }

    // == Run ==
    /// Runs the future built by `start` unless one is already in flight for `key`,
    /// in which case the running one is awaited and `start` is handed back unused.
    ///
    /// `start` receives the generation of its flight, for [`Self::is_current`].
    /// The slot is released by whichever caller observes completion first, so a
    /// leader dropped mid-flight does not leave a stale result behind.
    pub async fn run<F, Fut>(&self, key: &str, start: F) -> (Flight<Result<Value>>, Option<F>)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let (generation, shared, unused) = {
            let mut pending = self.lock();
            match pending.get(key) {
                Some((generation, shared)) => (*generation, shared.clone(), Some(start)),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let shared = start(generation).boxed().shared();
                    pending.insert(key.to_string(), (generation, shared.clone()));
                    (generation, shared, None)
                }
            }
        };

        let result = shared.await;

        {
            let mut pending = self.lock();
            if matches!(pending.get(key), Some((current, _)) if *current == generation) {
                pending.remove(key);
            }
        }

        match unused {
            None => (Flight::Led(result), None),
            Some(start) => (Flight::Joined(result), Some(start)),
        }
    }
}
