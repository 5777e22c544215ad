#![allow(clippy::unwrap_used)]
// Integration tests for `RestDocumentStore` using wiremock.

use futures_util::StreamExt;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scarelink_api::{DocumentStore, Error, RestDocumentStore};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(token: Option<&str>) -> (MockServer, RestDocumentStore) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let store = RestDocumentStore::with_clients(
        reqwest::Client::new(),
        reqwest::Client::new(),
        base_url,
        token.map(|t| t.to_string().into()),
    );
    (server, store)
}

// ── Read / append ───────────────────────────────────────────────────

#[tokio::test]
async fn test_read_document() {
    let (server, store) = setup(None).await;

    Mock::given(method("GET"))
        .and(path("/devices/crow-01/presence.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"lastSeen": 1234})))
        .mount(&server)
        .await;

    let doc = store.read("devices/crow-01/presence").await.unwrap();
    assert_eq!(doc, Some(json!({"lastSeen": 1234})));
}

#[tokio::test]
async fn test_read_missing_document_is_none() {
    let (server, store) = setup(None).await;

    Mock::given(method("GET"))
        .and(path("/devices/ghost.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    assert_eq!(store.read("/devices/ghost/").await.unwrap(), None);
}

#[tokio::test]
async fn test_auth_token_in_query() {
    let (server, store) = setup(Some("s3cret")).await;

    Mock::given(method("GET"))
        .and(path("/devices/crow-01.json"))
        .and(query_param("auth", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    store.read("devices/crow-01").await.unwrap();
}

#[tokio::test]
async fn test_rejected_credentials() {
    let (server, store) = setup(Some("bad")).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Permission denied"})))
        .mount(&server)
        .await;

    let result = store.read("devices/crow-01").await;
    assert!(
        matches!(result, Err(Error::Unauthorized)),
        "expected Unauthorized, got: {result:?}"
    );
}

#[tokio::test]
async fn test_append_returns_generated_key() {
    let (server, store) = setup(None).await;

    Mock::given(method("POST"))
        .and(path("/devices/crow-01/commands.json"))
        .and(body_partial_json(json!({"action": "SOUND_ALARM", "status": "pending"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "-Nx1abc"})))
        .expect(1)
        .mount(&server)
        .await;

    let key = store
        .append(
            "devices/crow-01/commands",
            json!({"action": "SOUND_ALARM", "params": {}, "status": "pending"}),
        )
        .await
        .unwrap();
    assert_eq!(key, "-Nx1abc");
}

// ── Subscription ────────────────────────────────────────────────────

#[tokio::test]
async fn test_subscribe_folds_put_and_patch() {
    let (server, store) = setup(None).await;

    let body = concat!(
        "event: put\n",
        "data: {\"path\":\"/\",\"data\":{\"soilHumidity\":40,\"motion\":false}}\n\n",
        "event: keep-alive\n",
        "data: null\n\n",
        "event: patch\n",
        "data: {\"path\":\"/\",\"data\":{\"motion\":true}}\n\n",
    );

    Mock::given(method("GET"))
        .and(path("/devices/crow-01/telemetry.json"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let stream = store.subscribe("devices/crow-01/telemetry").await.unwrap();
    let docs: Vec<_> = stream.collect().await;

    assert_eq!(docs.len(), 2);
    assert_eq!(
        docs[0].as_ref().unwrap(),
        &json!({"soilHumidity": 40, "motion": false})
    );
    assert_eq!(
        docs[1].as_ref().unwrap(),
        &json!({"soilHumidity": 40, "motion": true})
    );
}

#[tokio::test]
async fn test_subscribe_auth_revoked_ends_with_error() {
    let (server, store) = setup(None).await;

    Mock::given(method("GET"))
        .and(path("/devices/crow-01/presence.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("event: auth_revoked\ndata: \"token expired\"\n\n"),
        )
        .mount(&server)
        .await;

    let stream = store.subscribe("devices/crow-01/presence").await.unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(Error::Unauthorized)));
}
