//! Configuration Module
//!
//! Handles loading sync configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::Ttl;

/// Sync layer configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Directory holding the persistent cache
    pub cache_dir: PathBuf,
    /// Maximum number of sync keys each service keeps in memory
    pub memory_cache_entries: usize,
    /// Wait between rate-limited attempts, in milliseconds
    pub rate_limit_backoff_ms: u64,
    /// Requests sent for one fetch before giving up on a 429
    pub rate_limit_max_attempts: u32,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// AnkiConnect endpoint
    pub anki_url: String,
    /// Bunpro API base URL
    pub bunpro_url: String,
    /// WaniKani API base URL
    pub wanikani_url: String,
    /// Freshness window for Anki deck reviews
    pub anki_ttl: Ttl,
    /// Freshness window for Bunpro collections
    pub bunpro_ttl: Ttl,
    /// Freshness window for WaniKani collections
    pub wanikani_ttl: Ttl,
}

impl SyncConfig {
    /// Creates a new SyncConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DIR` - Persistent cache directory (default: `.study-sync-cache`)
    /// - `MEMORY_CACHE_ENTRIES` - In-memory keys per service (default: 64)
    /// - `RATE_LIMIT_BACKOFF_MS` - Backoff after a 429 (default: 10000)
    /// - `RATE_LIMIT_MAX_ATTEMPTS` - Attempts per fetch (default: 10)
    /// - `REQUEST_TIMEOUT_SECS` - HTTP timeout (default: 30)
    /// - `ANKI_CONNECT_URL`, `BUNPRO_API_URL`, `WANIKANI_API_URL` - Upstream endpoints
    /// - `ANKI_TTL_MS`, `BUNPRO_TTL_MS`, `WANIKANI_TTL_MS` - Freshness windows;
    ///   `-1` means cached data never expires on its own
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            cache_dir: env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            memory_cache_entries: parse_var("MEMORY_CACHE_ENTRIES")
                .unwrap_or(defaults.memory_cache_entries),
            rate_limit_backoff_ms: parse_var("RATE_LIMIT_BACKOFF_MS")
                .unwrap_or(defaults.rate_limit_backoff_ms),
            rate_limit_max_attempts: parse_var("RATE_LIMIT_MAX_ATTEMPTS")
                .unwrap_or(defaults.rate_limit_max_attempts),
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            anki_url: env::var("ANKI_CONNECT_URL").unwrap_or(defaults.anki_url),
            bunpro_url: env::var("BUNPRO_API_URL").unwrap_or(defaults.bunpro_url),
            wanikani_url: env::var("WANIKANI_API_URL").unwrap_or(defaults.wanikani_url),
            anki_ttl: parse_var("ANKI_TTL_MS")
                .map(Ttl::from_millis)
                .unwrap_or(defaults.anki_ttl),
            bunpro_ttl: parse_var("BUNPRO_TTL_MS")
                .map(Ttl::from_millis)
                .unwrap_or(defaults.bunpro_ttl),
            wanikani_ttl: parse_var("WANIKANI_TTL_MS")
                .map(Ttl::from_millis)
                .unwrap_or(defaults.wanikani_ttl),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".study-sync-cache"),
            memory_cache_entries: 64,
            rate_limit_backoff_ms: 10_000,
            rate_limit_max_attempts: 10,
            request_timeout_secs: 30,
            anki_url: "http://127.0.0.1:8765".to_string(),
            bunpro_url: "https://api.bunpro.jp/api/frontend".to_string(),
            wanikani_url: "https://api.wanikani.com/v2".to_string(),
            anki_ttl: Ttl::Millis(5 * 60 * 1000),
            bunpro_ttl: Ttl::Millis(60 * 60 * 1000),
            wanikani_ttl: Ttl::Millis(60 * 60 * 1000),
        }
    }
}
