//! Integration Tests for the Anki Sync Service
//!
//! Runs the service against a mock AnkiConnect endpoint.

mod common;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use study_sync::cache::{KeyState, Ttl};
use study_sync::platforms::{AnkiCredentials, AnkiSync};
use study_sync::store::{InMemoryStore, PersistentStore};
use study_sync::{SyncContext, SyncError, SyncService, SyncState};
use tokio_test::{assert_err, assert_ok};

use common::{serve, test_config, RequestLog};

// == Mock Upstream ==

#[derive(Clone, Default)]
struct AnkiMock {
    log: RequestLog,
    decks: Arc<Mutex<Vec<String>>>,
    /// Raw review rows per deck
    reviews: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    api_key: Option<&'static str>,
    extra_envelope_key: bool,
}

fn row(review_time: i64) -> Value {
    json!([review_time, 1_500_000_000_000i64, -1, 3, 4, -60, 2500, 6157, 1])
}

fn answer(mock: &AnkiMock, action: &str, params: &Value) -> Result<Value, String> {
    match action {
        "version" => Ok(json!(6)),
        "deckNames" => Ok(json!(*mock.decks.lock().unwrap())),
        "cardReviews" => {
            let deck = params["deck"].as_str().unwrap_or_default();
            let start = params["startID"].as_i64().unwrap_or_default();
            let rows: Vec<Value> = mock
                .reviews
                .lock()
                .unwrap()
                .get(deck)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|row| row[0].as_i64().map_or(true, |time| time > start))
                .collect();
            Ok(json!(rows))
        }
        "multi" => {
            let results: Vec<Value> = params["actions"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .iter()
                .map(|sub| {
                    let action = sub["action"].as_str().unwrap_or_default();
                    match answer(mock, action, &sub["params"]) {
                        Ok(result) => json!({"result": result, "error": null}),
                        Err(error) => json!({"result": null, "error": error}),
                    }
                })
                .collect();
            Ok(json!(results))
        }
        other => Err(format!("unsupported action: {}", other)),
    }
}

async fn rpc(State(mock): State<AnkiMock>, Json(body): Json<Value>) -> Json<Value> {
    let action = body["action"].as_str().unwrap_or_default().to_string();
    mock.log.record(format!("{} {}", action, body["params"]));
    assert_eq!(body["version"], json!(6));

    if let Some(required) = mock.api_key {
        if body["key"] != json!(required) {
            return Json(json!({"result": null, "error": "valid api key must be provided"}));
        }
    }

    let mut envelope = match answer(&mock, &action, &body["params"]) {
        Ok(result) => json!({"result": result, "error": null}),
        Err(error) => json!({"result": null, "error": error}),
    };
    if mock.extra_envelope_key {
        envelope["warning"] = json!("deprecated");
    }
    Json(envelope)
}

fn mock_with_decks(decks: &[(&str, Vec<Value>)]) -> AnkiMock {
    let mock = AnkiMock::default();
    for (deck, rows) in decks {
        mock.decks.lock().unwrap().push(deck.to_string());
        mock.reviews
            .lock()
            .unwrap()
            .insert(deck.to_string(), rows.clone());
    }
    mock
}

async fn start(mock: AnkiMock, ttl: Ttl) -> (SyncState, Arc<InMemoryStore>) {
    let url = serve(Router::new().route("/", post(rpc)).with_state(mock)).await;
    let store = Arc::new(InMemoryStore::new());
    let config = test_config(&url, Path::new("unused"), ttl);
    let state = SyncState::new(store.clone(), &config).unwrap();
    (state, store)
}

fn times(reviews: &[study_sync::platforms::AnkiReview]) -> Vec<i64> {
    reviews.iter().map(|r| r.review_time).collect()
}

// == Login Tests ==

#[tokio::test]
async fn test_login_bundles_version_and_decks() {
    let mock = mock_with_decks(&[("Core", vec![]), ("Mining", vec![])]);
    let log = mock.log.clone();
    let (state, _) = start(mock, Ttl::Never).await;

    let profile = assert_ok!(state.anki.login(AnkiCredentials::default()).await);

    assert_eq!(profile.version, 6);
    assert_eq!(profile.decks, vec!["Core".to_string(), "Mining".to_string()]);
    assert_eq!(log.entries().len(), 1);
    assert_eq!(log.count("multi"), 1);
}

#[tokio::test]
async fn test_login_forwards_api_key() {
    let mock = AnkiMock {
        api_key: Some("secret"),
        ..mock_with_decks(&[("Core", vec![row(1_000)])])
    };
    let (state, _) = start(mock, Ttl::Never).await;

    let result = state.anki.login(AnkiCredentials::default()).await;
    assert_eq!(
        assert_err!(result),
        SyncError::Upstream("valid api key must be provided".to_string())
    );

    assert_ok!(
        state
            .anki
            .login(AnkiCredentials {
                key: Some("secret".to_string())
            })
            .await
    );
    let reviews = assert_ok!(state.anki.get_collection("Core").await);
    assert_eq!(times(&reviews), vec![1_000]);
}

#[tokio::test]
async fn test_extra_envelope_key_is_rejected() {
    let mock = AnkiMock {
        extra_envelope_key: true,
        ..mock_with_decks(&[("Core", vec![])])
    };
    let (state, _) = start(mock, Ttl::Never).await;

    let result = state.anki.login(AnkiCredentials::default()).await;
    assert!(matches!(result, Err(SyncError::Parse(_))));
}

#[tokio::test]
async fn test_reviews_require_login() {
    let (state, _) = start(mock_with_decks(&[("Core", vec![])]), Ttl::Never).await;

    let result = state.anki.get_collection("Core").await;
    assert_eq!(
        assert_err!(result),
        SyncError::NotAuthenticated("anki".to_string())
    );
}

// == Deck Review Tests ==

#[tokio::test]
async fn test_stale_deck_refreshes_from_newest_review() {
    let mock = mock_with_decks(&[("Core", vec![row(2_000), row(1_000)])]);
    let log = mock.log.clone();
    let upstream = mock.reviews.clone();
    let (state, _) = start(mock, Ttl::Millis(0)).await;
    assert_ok!(state.anki.login(AnkiCredentials::default()).await);

    let first = assert_ok!(state.anki.get_collection("Core").await);
    assert_eq!(times(&first), vec![1_000, 2_000]);
    assert_eq!(log.count(r#"cardReviews {"deck":"Core","startID":0}"#), 1);

    upstream
        .lock()
        .unwrap()
        .get_mut("Core")
        .unwrap()
        .push(row(3_000));
    let second = assert_ok!(state.anki.get_collection("Core").await);

    assert_eq!(times(&second), vec![1_000, 2_000, 3_000]);
    assert_eq!(log.count(r#"cardReviews {"deck":"Core","startID":2000}"#), 1);
}

#[tokio::test]
async fn test_wrong_arity_row_is_rejected_and_not_cached() {
    let short_row = json!([1_000, 1, -1, 3, 4, -60, 2500, 6157]);
    let mock = mock_with_decks(&[("Core", vec![row(500), short_row])]);
    let (state, store) = start(mock, Ttl::Never).await;
    assert_ok!(state.anki.login(AnkiCredentials::default()).await);

    let result = state.anki.get_collection("Core").await;

    assert!(matches!(result, Err(SyncError::Parse(_))));
    assert_eq!(
        assert_ok!(state.anki.collection_state("Core").await),
        KeyState::Empty
    );
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_unknown_deck() {
    let (state, _) = start(mock_with_decks(&[("Core", vec![])]), Ttl::Never).await;
    assert_ok!(state.anki.login(AnkiCredentials::default()).await);

    let result = state.anki.get_collection("Nope").await;
    assert_eq!(
        assert_err!(result),
        SyncError::UnknownCollection("Nope".to_string())
    );
}

#[tokio::test]
async fn test_all_reviews_then_flush() {
    let mock = mock_with_decks(&[
        ("Core", vec![row(1_000)]),
        ("Mining", vec![row(5_000), row(4_000)]),
    ]);
    let (state, store) = start(mock, Ttl::Never).await;
    assert_ok!(state.anki.login(AnkiCredentials::default()).await);

    let all = assert_ok!(state.anki.all_reviews(&SyncContext::detached()).await);
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].0, "Core");
    assert_eq!(times(&all[1].1), vec![4_000, 5_000]);

    let mut keys = assert_ok!(store.keys().await);
    keys.sort();
    assert_eq!(
        keys,
        vec![AnkiSync::deck_key("Core"), AnkiSync::deck_key("Mining")]
    );

    assert_ok!(state.anki.flush_cache().await);
    assert!(store.is_empty().await);
    assert_eq!(
        assert_ok!(state.anki.collection_state("Mining").await),
        KeyState::Empty
    );
}
