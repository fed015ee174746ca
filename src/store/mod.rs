//! Persistent Store Module
//!
//! Durable key-value storage for cache entries. The cache policy is the only
//! component that reads or writes through this trait.

mod file;
mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use file::FileStore;
pub use memory::InMemoryStore;

/// Callback handed every `(key, value)` pair by [`PersistentStore::iterate`].
pub type StoreVisitor<'a> = dyn for<'k, 'v> FnMut(&'k str, &'v Value) + Send + 'a;

/// Asynchronous string-keyed store of JSON values.
///
/// Single-key writes are atomic from the caller's perspective; there are no
/// guarantees across keys. A write is only durable once the returned future
/// resolves to `Ok`.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    /// Removes a key. Missing keys are not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Visits every stored `(key, value)` pair in unspecified order.
    async fn iterate(&self, visitor: &mut StoreVisitor<'_>) -> Result<()>;

    /// Lists every stored key.
    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.iterate(&mut |key, _| keys.push(key.to_string())).await?;
        Ok(keys)
    }
}
