//! Composition root: one shared persistent store, one HTTP client, and a sync
//! service per platform, each with its own in-memory cache.

use std::sync::Arc;

use tracing::info;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::fetch::HttpClient;
use crate::platforms::{AnkiSync, BunproSync, WanikaniSync};
use crate::store::{FileStore, PersistentStore};
use crate::sync::SyncService;

/// Sync services shared across the application. Cheap to clone.
#[derive(Clone)]
pub struct SyncState {
    pub store: Arc<dyn PersistentStore>,
    pub anki: Arc<AnkiSync>,
    pub bunpro: Arc<BunproSync>,
    pub wanikani: Arc<WanikaniSync>,
}

impl std::fmt::Debug for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncState")
            .field("anki", &self.anki)
            .field("bunpro", &self.bunpro)
            .field("wanikani", &self.wanikani)
            .finish_non_exhaustive()
    }
}

impl SyncState {
    /// Builds every service over an existing store.
    pub fn new(store: Arc<dyn PersistentStore>, config: &SyncConfig) -> Result<Self> {
        let http = HttpClient::from_config(config)?;
        let entries = config.memory_cache_entries;

        Ok(Self {
            anki: Arc::new(AnkiSync::new(
                http.clone(),
                config.anki_url.clone(),
                store.clone(),
                entries,
                config.anki_ttl,
            )),
            bunpro: Arc::new(BunproSync::new(
                http.clone(),
                config.bunpro_url.clone(),
                store.clone(),
                entries,
                config.bunpro_ttl,
            )),
            wanikani: Arc::new(WanikaniSync::new(
                http,
                config.wanikani_url.clone(),
                store.clone(),
                entries,
                config.wanikani_ttl,
            )),
            store,
        })
    }

    /// Opens the file-backed store under `config.cache_dir` and builds every service.
    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let store = FileStore::open(&config.cache_dir).await?;
        info!("Persistent cache opened at {}", store.root().display());
        Self::new(Arc::new(store), config)
    }

    /// Flushes the cached collections of every platform.
    pub async fn flush_all(&self) -> Result<()> {
        self.anki.flush_cache().await?;
        self.bunpro.flush_cache().await?;
        self.wanikani.flush_cache().await?;
        Ok(())
    }

    /// Logs out of every platform.
    pub async fn logout_all(&self) {
        self.anki.logout().await;
        self.bunpro.logout().await;
        self.wanikani.logout().await;
    }
}
