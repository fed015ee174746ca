//! Shared helpers for integration tests: mock upstreams served by axum on an
//! ephemeral local port.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::Router;
use study_sync::cache::Ttl;
use study_sync::SyncConfig;
use tokio::net::TcpListener;

/// Serves `router` on 127.0.0.1 and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Config pointing every platform at `base_url` with a fast retry budget.
pub fn test_config(base_url: &str, cache_dir: &Path, ttl: Ttl) -> SyncConfig {
    SyncConfig {
        cache_dir: cache_dir.to_path_buf(),
        memory_cache_entries: 8,
        rate_limit_backoff_ms: 1,
        rate_limit_max_attempts: 3,
        request_timeout_secs: 5,
        anki_url: base_url.to_string(),
        bunpro_url: base_url.to_string(),
        wanikani_url: base_url.to_string(),
        anki_ttl: ttl,
        bunpro_ttl: ttl,
        wanikani_ttl: ttl,
    }
}

/// Log of requests seen by a mock upstream.
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<String>>>);

impl RequestLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}
