//! Bunpro sync service.
//!
//! The history endpoint returns the whole review log in one body, so every
//! refresh is a full refetch merged into what is cached.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::cache::{CachePolicy, CacheStats, KeyState, Ttl};
use crate::error::{Result, SyncError};
use crate::fetch::{decode_json, expect_success, HttpClient};
use crate::store::PersistentStore;
use crate::sync::{platform_prefix, sync_key, sync_records, SyncContext, SyncRecord, SyncService};

pub const PLATFORM: &str = "bunpro";
pub const REVIEWS: &str = "reviews";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarReview {
    pub id: i64,
    pub grammar_point_id: i64,
    pub created_at: DateTime<Utc>,
    pub correct: bool,
}

impl SyncRecord for GrammarReview {
    fn record_id(&self) -> i64 {
        self.id
    }

    fn timestamp_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunproProfile {
    pub username: String,
    #[serde(default)]
    pub level: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: BunproProfile,
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    reviews: Vec<GrammarReview>,
}

#[derive(Debug, Clone)]
pub struct BunproCredentials {
    pub api_key: String,
}

/// Sync service for the Bunpro API.
#[derive(Debug)]
pub struct BunproSync {
    http: HttpClient,
    base_url: String,
    ttl: Ttl,
    api_key: RwLock<Option<String>>,
    policy: CachePolicy,
}

impl BunproSync {
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        store: Arc<dyn PersistentStore>,
        memory_entries: usize,
        ttl: Ttl,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl,
            api_key: RwLock::new(None),
            policy: CachePolicy::new(store, memory_entries),
        }
    }

    fn authorize(http: &HttpClient, url: &str, api_key: &str) -> RequestBuilder {
        http.inner()
            .get(url)
            .header(AUTHORIZATION, format!("Token token={}", api_key))
    }

    pub async fn reviews(&self, ctx: &SyncContext) -> Result<Vec<GrammarReview>> {
        let api_key = self
            .api_key
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::NotAuthenticated(PLATFORM.to_string()))?;
        let http = self.http.clone();
        let url = format!("{}/reviews/history", self.base_url);
        let fetch_ctx = ctx.clone();

        let reviews = sync_records(
            &self.policy,
            &sync_key(PLATFORM, REVIEWS),
            self.ttl,
            ctx,
            move |_mark| async move {
                let request = Self::authorize(&http, &url, &api_key).build()?;
                let response = http.fetch_with_retry(request, &fetch_ctx).await?;
                let history: HistoryEnvelope = decode_json(expect_success(response).await?).await?;
                Ok(history.reviews)
            },
        )
        .await?;

        info!("Bunpro reviews: {} records", reviews.len());
        Ok(reviews)
    }
}

#[async_trait]
impl SyncService for BunproSync {
    type Credentials = BunproCredentials;
    type Profile = BunproProfile;
    type Record = GrammarReview;

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    async fn login(&self, credentials: BunproCredentials) -> Result<BunproProfile> {
        let url = format!("{}/user", self.base_url);
        let request = Self::authorize(&self.http, &url, &credentials.api_key).build()?;
        let response = self
            .http
            .fetch_with_retry(request, &SyncContext::detached())
            .await?;
        let envelope: UserEnvelope = decode_json(expect_success(response).await?).await?;

        *self.api_key.write().await = Some(credentials.api_key);
        info!("Logged in to Bunpro as {}", envelope.user.username);
        Ok(envelope.user)
    }

    async fn logout(&self) {
        *self.api_key.write().await = None;
    }

    async fn get_collection_with(
        &self,
        name: &str,
        ctx: &SyncContext,
    ) -> Result<Vec<GrammarReview>> {
        match name {
            REVIEWS => self.reviews(ctx).await,
            other => Err(SyncError::UnknownCollection(other.to_string())),
        }
    }

    async fn flush_cache(&self) -> Result<()> {
        self.policy.flush_prefix(&platform_prefix(PLATFORM)).await?;
        Ok(())
    }

    async fn collection_state(&self, name: &str) -> Result<KeyState> {
        self.policy
            .key_state(&sync_key(PLATFORM, name), self.ttl)
            .await
    }

    fn cache_stats(&self) -> CacheStats {
        self.policy.stats()
    }
}
