//! Anki sync service over AnkiConnect.
//!
//! AnkiConnect is a local JSON-RPC endpoint: every call is a POST of
//! `{action, version, params, key?}` answered by an envelope with exactly the
//! keys `result` and `error`. Reviews are fetched per deck with `cardReviews`,
//! which returns positional tuples decoded into [`AnkiReview`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cache::{CachePolicy, CacheStats, KeyState, Ttl};
use crate::error::{Result, SyncError};
use crate::fetch::{decode_json, expect_success, HttpClient};
use crate::store::PersistentStore;
use crate::sync::{platform_prefix, sync_key, sync_records, SyncContext, SyncRecord, SyncService};

pub const PLATFORM: &str = "anki";
/// AnkiConnect protocol version sent with every action.
pub const API_VERSION: u32 = 6;

/// Fields in one `cardReviews` tuple.
const REVIEW_ARITY: usize = 9;

// == Review Tuple ==
/// One review row: `[reviewTime, cardID, usn, buttonPressed, newInterval,
/// previousInterval, newFactor, reviewDuration, reviewType]`.
///
/// The review time is in epoch milliseconds and doubles as the review id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnkiReview {
    pub review_time: i64,
    pub card_id: i64,
    pub usn: i64,
    pub button_pressed: i64,
    pub new_interval: i64,
    pub previous_interval: i64,
    pub new_factor: i64,
    pub review_duration: i64,
    pub review_type: i64,
}

impl AnkiReview {
    fn to_tuple(self) -> [i64; REVIEW_ARITY] {
        [
            self.review_time,
            self.card_id,
            self.usn,
            self.button_pressed,
            self.new_interval,
            self.previous_interval,
            self.new_factor,
            self.review_duration,
            self.review_type,
        ]
    }
}

impl Serialize for AnkiReview {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_tuple().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AnkiReview {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let fields = Vec::<i64>::deserialize(deserializer)?;
        match fields[..] {
            [
                review_time,
                card_id,
                usn,
                button_pressed,
                new_interval,
                previous_interval,
                new_factor,
                review_duration,
                review_type,
            ] => Ok(Self {
                review_time,
                card_id,
                usn,
                button_pressed,
                new_interval,
                previous_interval,
                new_factor,
                review_duration,
                review_type,
            }),
            _ => Err(de::Error::invalid_length(fields.len(), &ReviewArity)),
        }
    }
}

struct ReviewArity;

impl de::Expected for ReviewArity {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a review tuple of {} integers", REVIEW_ARITY)
    }
}

impl SyncRecord for AnkiReview {
    fn record_id(&self) -> i64 {
        self.review_time
    }

    fn timestamp_ms(&self) -> i64 {
        self.review_time
    }
}

// == Envelope ==
/// Unwraps an AnkiConnect response envelope.
///
/// The envelope must be an object with exactly the keys `result` and `error`;
/// a non-null `error` is an upstream failure.
fn unwrap_envelope<T: DeserializeOwned>(action: &str, body: Value) -> Result<T> {
    let mut envelope = match body {
        Value::Object(map) => map,
        other => {
            return Err(SyncError::Parse(format!(
                "{}: expected response envelope, got {}",
                action, other
            )))
        }
    };
    if envelope.len() != 2 || !envelope.contains_key("result") || !envelope.contains_key("error") {
        let keys: Vec<&String> = envelope.keys().collect();
        return Err(SyncError::Parse(format!(
            "{}: response envelope must have exactly result and error, got {:?}",
            action, keys
        )));
    }

    match envelope.remove("error") {
        Some(Value::Null) | None => {}
        Some(Value::String(message)) => return Err(SyncError::Upstream(message)),
        Some(other) => return Err(SyncError::Upstream(other.to_string())),
    }

    let result = envelope.remove("result").unwrap_or(Value::Null);
    serde_json::from_value(result).map_err(|e| SyncError::Parse(format!("{}: {}", action, e)))
}

// == Profile ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnkiProfile {
    pub version: u32,
    pub decks: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AnkiCredentials {
    /// Only needed when AnkiConnect is configured with an API key
    pub key: Option<String>,
}

// == Service ==
/// Sync service for a local AnkiConnect endpoint.
#[derive(Debug)]
pub struct AnkiSync {
    http: HttpClient,
    url: String,
    ttl: Ttl,
    session: RwLock<Option<AnkiCredentials>>,
    policy: CachePolicy,
}

impl AnkiSync {
    pub fn new(
        http: HttpClient,
        url: impl Into<String>,
        store: Arc<dyn PersistentStore>,
        memory_entries: usize,
        ttl: Ttl,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            ttl,
            session: RwLock::new(None),
            policy: CachePolicy::new(store, memory_entries),
        }
    }

    /// Sync key of a deck's review collection.
    pub fn deck_key(deck: &str) -> String {
        sync_key(PLATFORM, &format!("reviews-{}", deck))
    }

    async fn session(&self) -> Result<AnkiCredentials> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::NotAuthenticated(PLATFORM.to_string()))
    }

    /// Sends one action and unwraps its envelope.
    async fn invoke<T: DeserializeOwned>(
        http: &HttpClient,
        url: &str,
        key: Option<&str>,
        action: &str,
        params: Value,
        ctx: &SyncContext,
    ) -> Result<T> {
        let mut body = json!({
            "action": action,
            "version": API_VERSION,
            "params": params,
        });
        if let Some(key) = key {
            body["key"] = Value::String(key.to_string());
        }

        debug!("AnkiConnect {}", action);
        let request = http.inner().post(url).json(&body).build()?;
        let response = http.fetch_with_retry(request, ctx).await?;
        let body: Value = decode_json(expect_success(response).await?).await?;
        unwrap_envelope(action, body)
    }

    /// Returns the names of every deck in the collection.
    pub async fn deck_names(&self, ctx: &SyncContext) -> Result<Vec<String>> {
        let session = self.session().await?;
        Self::invoke(
            &self.http,
            &self.url,
            session.key.as_deref(),
            "deckNames",
            json!({}),
            ctx,
        )
        .await
    }

    /// Syncs the reviews of one deck, asking only for reviews after the newest
    /// cached one.
    pub async fn deck_reviews(&self, deck: &str, ctx: &SyncContext) -> Result<Vec<AnkiReview>> {
        let session = self.session().await?;
        let http = self.http.clone();
        let url = self.url.clone();
        let deck_name = deck.to_string();
        let fetch_ctx = ctx.clone();

        let reviews = sync_records(
            &self.policy,
            &Self::deck_key(deck),
            self.ttl,
            ctx,
            move |mark| async move {
                let key = session.key.as_deref();
                let decks: Vec<String> =
                    Self::invoke(&http, &url, key, "deckNames", json!({}), &fetch_ctx).await?;
                if !decks.contains(&deck_name) {
                    return Err(SyncError::UnknownCollection(deck_name));
                }

                let start_id = mark.map(|m| m.max_id).unwrap_or(0);
                Self::invoke::<Vec<AnkiReview>>(
                    &http,
                    &url,
                    key,
                    "cardReviews",
                    json!({"deck": deck_name, "startID": start_id}),
                    &fetch_ctx,
                )
                .await
            },
        )
        .await?;

        info!("Anki deck '{}': {} reviews", deck, reviews.len());
        Ok(reviews)
    }

    /// Syncs every deck one after another, returning `(deck, reviews)` pairs.
    pub async fn all_reviews(&self, ctx: &SyncContext) -> Result<Vec<(String, Vec<AnkiReview>)>> {
        let decks = self.deck_names(ctx).await?;
        let mut all = Vec::with_capacity(decks.len());
        for deck in decks {
            ctx.check_cancelled()?;
            let reviews = self.deck_reviews(&deck, ctx).await?;
            all.push((deck, reviews));
        }
        Ok(all)
    }
}

#[async_trait]
impl SyncService for AnkiSync {
    type Credentials = AnkiCredentials;
    type Profile = AnkiProfile;
    type Record = AnkiReview;

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    /// Checks the endpoint answers by bundling `version` and `deckNames` in a
    /// single `multi` call.
    async fn login(&self, credentials: AnkiCredentials) -> Result<AnkiProfile> {
        let results: Vec<Value> = Self::invoke(
            &self.http,
            &self.url,
            credentials.key.as_deref(),
            "multi",
            json!({"actions": [
                {"action": "version", "version": API_VERSION},
                {"action": "deckNames", "version": API_VERSION},
            ]}),
            &SyncContext::detached(),
        )
        .await?;

        let [version, decks]: [Value; 2] = results.try_into().map_err(|results: Vec<Value>| {
            SyncError::Parse(format!("multi: expected 2 results, got {}", results.len()))
        })?;
        let profile = AnkiProfile {
            version: unwrap_envelope("version", version)?,
            decks: unwrap_envelope("deckNames", decks)?,
        };

        *self.session.write().await = Some(credentials);
        info!(
            "Connected to AnkiConnect v{} ({} decks)",
            profile.version,
            profile.decks.len()
        );
        Ok(profile)
    }

    async fn logout(&self) {
        *self.session.write().await = None;
    }

    /// `name` is a deck name.
    async fn get_collection_with(&self, name: &str, ctx: &SyncContext) -> Result<Vec<AnkiReview>> {
        self.deck_reviews(name, ctx).await
    }

    async fn flush_cache(&self) -> Result<()> {
        self.policy.flush_prefix(&platform_prefix(PLATFORM)).await?;
        Ok(())
    }

    async fn collection_state(&self, name: &str) -> Result<KeyState> {
        self.policy.key_state(&Self::deck_key(name), self.ttl).await
    }

    fn cache_stats(&self) -> CacheStats {
        self.policy.stats()
    }
}
