//! WaniKani sync service.
//!
//! Bearer-token REST API with `{data, pages: {next_url}}` pagination. Reviews
//! are immutable and refreshed from the highest cached id; assignments and
//! level progressions change over time and are refreshed by `updated_after`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::cache::{CachePolicy, CacheStats, KeyState, Ttl};
use crate::error::{Result, SyncError};
use crate::fetch::{decode_json, expect_success, fetch_all, HttpClient};
use crate::store::PersistentStore;
use crate::sync::{
    platform_prefix, sync_key, sync_records, HighWaterMark, SyncContext, SyncRecord, SyncService,
};

pub const PLATFORM: &str = "wanikani";
/// API revision pinned by every request.
pub const API_REVISION: &str = "20170710";

pub const REVIEWS: &str = "reviews";
pub const ASSIGNMENTS: &str = "assignments";
pub const LEVEL_PROGRESSIONS: &str = "level-progressions";

// == Records ==
/// A WaniKani resource: `{id, object, data_updated_at, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource<D> {
    pub id: i64,
    pub object: String,
    pub data_updated_at: Option<DateTime<Utc>>,
    pub data: D,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewData {
    pub created_at: DateTime<Utc>,
    pub assignment_id: i64,
    pub subject_id: i64,
    pub starting_srs_stage: u8,
    pub ending_srs_stage: u8,
    pub incorrect_meaning_answers: u32,
    pub incorrect_reading_answers: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentData {
    pub created_at: DateTime<Utc>,
    pub subject_id: i64,
    pub subject_type: String,
    pub srs_stage: u8,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub passed_at: Option<DateTime<Utc>>,
    pub burned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgressionData {
    pub created_at: DateTime<Utc>,
    pub level: u32,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub passed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub abandoned_at: Option<DateTime<Utc>>,
}

pub type Review = Resource<ReviewData>;
pub type Assignment = Resource<AssignmentData>;
pub type LevelProgression = Resource<LevelProgressionData>;

/// Record data carrying its own creation time.
pub trait Created {
    fn created_at(&self) -> DateTime<Utc>;
}

impl Created for ReviewData {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Created for AssignmentData {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Created for LevelProgressionData {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl<D: Created> SyncRecord for Resource<D> {
    fn record_id(&self) -> i64 {
        self.id
    }

    fn timestamp_ms(&self) -> i64 {
        self.data.created_at().timestamp_millis()
    }

    fn updated_ms(&self) -> i64 {
        self.data_updated_at
            .map(|at| at.timestamp_millis())
            .unwrap_or_else(|| self.timestamp_ms())
    }
}

// == Profile ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub level: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub current_vacation_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    data: UserProfile,
}

// == Credentials ==
#[derive(Debug, Clone)]
pub struct WanikaniCredentials {
    pub api_token: String,
}

/// How a collection asks for records newer than the cache.
#[derive(Debug, Clone, Copy)]
enum Incremental {
    /// Immutable records: `page_after_id=<max id>`
    AfterId,
    /// Mutable records: `updated_after=<max data_updated_at>`
    UpdatedAfter,
}

impl Incremental {
    fn query(&self, mark: &HighWaterMark) -> (&'static str, String) {
        match self {
            Incremental::AfterId => ("page_after_id", mark.max_id.to_string()),
            Incremental::UpdatedAfter => ("updated_after", iso8601(mark.max_updated_ms)),
        }
    }
}

fn iso8601(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

// == Service ==
/// Sync service for the WaniKani v2 API.
#[derive(Debug)]
pub struct WanikaniSync {
    http: HttpClient,
    base_url: String,
    ttl: Ttl,
    token: RwLock<Option<String>>,
    policy: CachePolicy,
}

impl WanikaniSync {
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
            token: RwLock::new(None),
            policy: CachePolicy::new(store, memory_entries),
        }
    }

    async fn token(&self) -> Result<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::NotAuthenticated(PLATFORM.to_string()))
    }

    fn authorize(http: &HttpClient, url: &str, token: &str) -> RequestBuilder {
        http.inner()
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header("Wanikani-Revision", API_REVISION)
    }

    /// Syncs one paginated collection through the cache.
    async fn collection<D>(
        &self,
        name: &str,
        incremental: Incremental,
        ctx: &SyncContext,
    ) -> Result<Vec<Resource<D>>>
    where
        D: Created + Serialize + DeserializeOwned + Send + 'static,
    {
        let token = self.token().await?;
        let http = self.http.clone();
        let endpoint = format!("{}/{}", self.base_url, name.replace('-', "_"));
        let key = sync_key(PLATFORM, name);
        let fetch_ctx = ctx.clone();

        let records = sync_records(&self.policy, &key, self.ttl, ctx, move |mark| async move {
            let first_url = match mark {
                Some(mark) => {
                    let (param, value) = incremental.query(&mark);
                    format!("{}?{}={}", endpoint, param, value)
                }
                None => endpoint,
            };
            fetch_all::<Resource<D>, _>(
                &http,
                first_url,
                |url| Self::authorize(&http, url, &token),
                &fetch_ctx,
            )
            .await
        })
        .await?;

        info!("WaniKani {}: {} records", name, records.len());
        Ok(records)
    }

    pub async fn reviews(&self, ctx: &SyncContext) -> Result<Vec<Review>> {
        self.collection(REVIEWS, Incremental::AfterId, ctx).await
    }

    pub async fn assignments(&self, ctx: &SyncContext) -> Result<Vec<Assignment>> {
        self.collection(ASSIGNMENTS, Incremental::UpdatedAfter, ctx)
            .await
    }

    pub async fn level_progressions(&self, ctx: &SyncContext) -> Result<Vec<LevelProgression>> {
        self.collection(LEVEL_PROGRESSIONS, Incremental::UpdatedAfter, ctx)
            .await
    }
}

#[async_trait]
impl SyncService for WanikaniSync {
    type Credentials = WanikaniCredentials;
    type Profile = UserProfile;
    type Record = Review;

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    async fn login(&self, credentials: WanikaniCredentials) -> Result<UserProfile> {
        let url = format!("{}/user", self.base_url);
        let request = Self::authorize(&self.http, &url, &credentials.api_token).build()?;
        let response = self
            .http
            .fetch_with_retry(request, &SyncContext::detached())
            .await?;
        let envelope: UserEnvelope = decode_json(expect_success(response).await?).await?;

        *self.token.write().await = Some(credentials.api_token);
        info!("Logged in to WaniKani as {}", envelope.data.username);
        Ok(envelope.data)
    }

    async fn logout(&self) {
        *self.token.write().await = None;
    }

    /// Only `reviews` is served here; use [`WanikaniSync::assignments`] and
    /// [`WanikaniSync::level_progressions`] for the other collections.
    async fn get_collection_with(&self, name: &str, ctx: &SyncContext) -> Result<Vec<Review>> {
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
