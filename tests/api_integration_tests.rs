//! Integration Tests for API Endpoints
//!
//! Full request/response cycles through the router, backed by the memory store.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use dcache::{
    api::create_router,
    store::{MemoryStore, RemoteStore},
    AppState, Dcache, DcacheOptions,
};
use serde_json::Value;
use tower::ServiceExt;

// == Helper Functions ==

async fn create_test_app() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let options = DcacheOptions {
        cleanup_interval: 0,
        ..DcacheOptions::default()
    };
    let cache = Dcache::start(store.clone(), options).await;
    (create_router(AppState::new(cache)), store)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

// == SET / GET ==

#[tokio::test]
async fn test_set_then_get_roundtrip() {
    let (app, _store) = create_test_app().await;

    let (status, json) = send(
        &app,
        "PUT",
        "/set",
        Some(r#"{"key":"user:1","value":{"name":"ada","age":36}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("user:1"));
    assert_eq!(json["ttl"], 3600);

    let (status, json) = send(&app, "GET", "/get/user:1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"], "user:1");
    assert_eq!(json["value"]["name"], "ada");
    assert_eq!(json["value"]["age"], 36);
}

#[tokio::test]
async fn test_set_non_positive_ttl_uses_default() {
    let (app, store) = create_test_app().await;

    let (status, json) = send(&app, "PUT", "/set", Some(r#"{"key":"k","value":1,"ttl":-5}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ttl"], 3600);
    assert_eq!(store.ttl("k").await.unwrap(), 3600);
}

#[tokio::test]
async fn test_set_store_down() {
    let (app, store) = create_test_app().await;
    store.fail_writes(true);

    let (status, json) = send(&app, "PUT", "/set", Some(r#"{"key":"k","value":1}"#)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let (app, _store) = create_test_app().await;

    let (status, json) = send(&app, "GET", "/get/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_get_reads_through_to_store() {
    let (app, store) = create_test_app().await;
    store.set_ex("remote", "[1,2,3]", 600).await.unwrap();

    let (status, json) = send(&app, "GET", "/get/remote", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], serde_json::json!([1, 2, 3]));

    let (_, json) = send(&app, "GET", "/exists/remote", None).await;
    assert_eq!(json["remote"], true);
    assert_eq!(json["local"], true);
}

// == DELETE ==

#[tokio::test]
async fn test_delete_endpoint() {
    let (app, store) = create_test_app().await;
    send(&app, "PUT", "/set", Some(r#"{"key":"gone","value":"x"}"#)).await;

    let (status, json) = send(&app, "DELETE", "/del/gone", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("gone"));
    assert!(!store.exists("gone").await.unwrap());

    let (status, _) = send(&app, "GET", "/get/gone", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_absent_key_succeeds() {
    let (app, _store) = create_test_app().await;

    let (status, _) = send(&app, "DELETE", "/del/never_set", None).await;
    assert_eq!(status, StatusCode::OK);
}

// == INCR ==

#[tokio::test]
async fn test_incr_endpoint() {
    let (app, _store) = create_test_app().await;

    let (status, json) = send(&app, "POST", "/incr/counter", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], 1);

    let (status, json) = send(&app, "POST", "/incr/counter", Some(r#"{"delta":10}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], 11);
}

#[tokio::test]
async fn test_incr_non_integer_value() {
    let (app, store) = create_test_app().await;
    store.set_ex("word", "\"abc\"", 60).await.unwrap();

    let (status, json) = send(&app, "POST", "/incr/word", None).await;
    assert!(status.is_client_error() || status.is_server_error());
    assert!(json.get("error").is_some());
}

// == SCAN DELETE ==

#[tokio::test]
async fn test_scan_delete_endpoint() {
    let (app, store) = create_test_app().await;
    for i in 0..5 {
        store.set_ex(&format!("session:{}", i), "1", 60).await.unwrap();
    }
    store.set_ex("user:1", "1", 60).await.unwrap();

    let (status, json) = send(&app, "DELETE", "/scan/session:*", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], 5);
    assert!(store.exists("user:1").await.unwrap());
}

#[tokio::test]
async fn test_scan_delete_partial_failure() {
    let (app, store) = create_test_app().await;
    for i in 0..6 {
        store.set_ex(&format!("job:{}", i), "1", 60).await.unwrap();
    }
    store.fail_deletes_after(2);

    let (status, json) = send(&app, "DELETE", "/scan/job:*", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["deleted"], 2);
}

// == STATS / HEALTH ==

#[tokio::test]
async fn test_stats_endpoint() {
    let (app, _store) = create_test_app().await;
    send(&app, "PUT", "/set", Some(r#"{"key":"a","value":1}"#)).await;
    send(&app, "GET", "/get/a", None).await;

    let (status, json) = send(&app, "GET", "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hits"], 1);
    assert_eq!(json["total_entries"], 1);
    assert_eq!(json["mode"], "memory");
    assert_eq!(json["bus_active"], true);
    assert_eq!(json["instance"].as_str().unwrap().len(), 16);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _store) = create_test_app().await;

    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
}

// == Error Handling ==

#[tokio::test]
async fn test_invalid_json_request() {
    let (app, _store) = create_test_app().await;

    let (status, _) = send(&app, "PUT", "/set", Some("{not json")).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_empty_key_request() {
    let (app, _store) = create_test_app().await;

    let (status, json) = send(&app, "PUT", "/set", Some(r#"{"key":"","value":1}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.get("error").is_some());
}
