use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use beacon_api::router;
use beacon_store::{Backend, StatusStore, StoreError};
use beacon_types::status::{PresenceState, StatusRecord};

struct UnreachableBackend;

impl Backend for UnreachableBackend {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Backend("connection refused".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend("connection refused".into()))
    }
}

async fn get(store: StatusStore, uri: &str) -> (StatusCode, header::HeaderMap, Value) {
    let res = router(store)
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(header::ORIGIN, "https://github.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = res.status();
    let headers = res.headers().clone();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, json)
}

#[tokio::test]
async fn badge_reflects_stored_record() {
    let store = StatusStore::memory();
    store.set(&StatusRecord::new(PresenceState::DoNotDisturb)).await;

    let (status, headers, body) = get(store, "/discord-status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({
            "schemaVersion": 1,
            "label": "Discord",
            "message": "Do Not Disturb",
            "color": "red",
            "isError": false,
            "namedLogo": "discord",
            "logoColor": "white",
            "style": "flat-square",
        })
    );
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-store, must-revalidate");
    assert_eq!(headers[header::PRAGMA], "no-cache");
    assert_eq!(headers[header::EXPIRES], "0");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn badge_survives_unreachable_store() {
    let store = StatusStore::new(Arc::new(UnreachableBackend));
    let (status, _, body) = get(store, "/discord-status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Offline");
    assert_eq!(body["color"], "gray");
    assert_eq!(body["isError"], false);
}

#[tokio::test]
async fn refresh_reports_record() {
    let store = StatusStore::memory();
    store.set(&StatusRecord::new(PresenceState::Online)).await;

    let (status, _, body) = get(store, "/discord-status/refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["record"]["status"], "Online");
    assert_eq!(body["record"]["color"], "brightgreen");
}

#[tokio::test]
async fn refresh_reports_store_failure() {
    let store = StatusStore::new(Arc::new(UnreachableBackend));
    let (status, _, body) = get(store, "/discord-status/refresh").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn cors_preflight_allows_get_only() {
    let res = router(StatusStore::memory())
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/discord-status")
                .header(header::ORIGIN, "https://example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let methods = res.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap();
    assert_eq!(methods, "GET");
}
