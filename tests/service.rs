//! Router tests for the demo JSON service

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cloudauto::service::{router, ItemResponse, WELCOME_MESSAGE};
use serde_json::Value;
use tower::ServiceExt;

async fn get(uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = router().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

/// Root route returns the welcome message
#[tokio::test]
async fn welcome_returns_message() {
    let (status, body) = get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Message"], WELCOME_MESSAGE);
}

/// Item route echoes the id and the q parameter
#[tokio::test]
async fn item_echoes_id_and_query() {
    let (status, body) = get("/items/42?q=hello").await;
    assert_eq!(status, StatusCode::OK);
    let item: ItemResponse = serde_json::from_value(body).unwrap();
    assert_eq!(
        item,
        ItemResponse {
            item_id: 42,
            q: Some("hello".to_string())
        }
    );
}

/// Missing q is serialized as null
#[tokio::test]
async fn item_without_query_has_null_q() {
    let (status, body) = get("/items/-7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"item_id": -7, "q": null}));
}

/// Non-integer ids are rejected with 422
#[tokio::test]
async fn non_integer_item_is_unprocessable() {
    let (status, body) = get("/items/abc").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("integer"));
}

/// Ids past the i64 range are rejected like any other non-integer
#[tokio::test]
async fn item_id_beyond_i64_is_unprocessable() {
    let (status, body) = get("/items/9223372036854775808").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string());

    let (status, body) = get("/items/9223372036854775807").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["item_id"], i64::MAX);
}
