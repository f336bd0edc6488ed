//! Shapes API 客户端测试

mod common;

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use serde_json::json;
use shapes_bridge::{BridgeError, ChatBackend, CompletionRequest, ShapesClient};

use common::{completion_json as completion, MockUpstream};

fn client(upstream: &MockUpstream) -> ShapesClient {
    ShapesClient::new("test-key", format!("{}/v1", upstream.base_url), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_complete_sends_identity_headers() {
    common::setup();
    let upstream = MockUpstream::start(|_| (StatusCode::OK, completion("  Hello there!  "))).await;

    let request = CompletionRequest::single("tenshi", "hi")
        .user("user-1")
        .channel("chan-1")
        .temperature(0.7)
        .max_tokens(1024);
    let reply = client(&upstream).complete(request).await.unwrap();
    assert_eq!(reply, "Hello there!");

    let sent = upstream.requests_to("/v1/chat/completions");
    assert_eq!(sent.len(), 1);
    let req = &sent[0];
    assert_eq!(req.header("authorization"), Some("Bearer test-key"));
    assert_eq!(req.header("x-user-id"), Some("user-1"));
    assert_eq!(req.header("x-channel-id"), Some("chan-1"));

    let body = req.json();
    assert_eq!(body["model"], "shapesinc/tenshi");
    assert_eq!(body["messages"], json!([{"role": "user", "content": "hi"}]));
    assert_eq!(body["max_tokens"], 1024);
    assert!(body.get("temperature").is_some());
}

#[tokio::test]
async fn test_complete_omits_absent_identity() {
    let upstream = MockUpstream::start(|_| (StatusCode::OK, completion("ok"))).await;

    client(&upstream)
        .complete(CompletionRequest::single("tenshi", "hi").user(""))
        .await
        .unwrap();

    let req = &upstream.requests()[0];
    assert!(req.header("x-user-id").is_none());
    assert!(req.header("x-channel-id").is_none());
    let body = req.json();
    assert!(body.get("temperature").is_none());
    assert!(body.get("max_tokens").is_none());
}

#[tokio::test]
async fn test_complete_error_mapping() {
    let upstream = MockUpstream::start(|req| match req.header("x-user-id") {
        Some("limited") => (StatusCode::TOO_MANY_REQUESTS, "slow down".to_string()),
        Some("denied") => (StatusCode::UNAUTHORIZED, "bad key".to_string()),
        _ => (
            StatusCode::OK,
            json!({"id": "x", "object": "chat.completion", "created": 1, "model": "m", "choices": []})
                .to_string(),
        ),
    })
    .await;
    let client = client(&upstream);

    let err = client
        .complete(CompletionRequest::single("tenshi", "hi").user("limited"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::RateLimited(ref body) if body == "slow down"));

    let err = client
        .complete(CompletionRequest::single("tenshi", "hi").user("denied"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Api { status: 401, .. }));
    assert!(err.user_message().contains("API key"));

    let err = client
        .complete(CompletionRequest::single("tenshi", "hi").user("empty"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unreachable_upstream_is_network_error() {
    let client = ShapesClient::new("k", "http://127.0.0.1:1/v1", Duration::from_secs(2)).unwrap();
    let err = client
        .complete(CompletionRequest::single("tenshi", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Network(_)));
}

#[tokio::test]
async fn test_shape_name() {
    let upstream = MockUpstream::start(|req| {
        if req.path == "/v1/shape_name" {
            (StatusCode::OK, json!({"name": "tenshi"}).to_string())
        } else {
            (StatusCode::NOT_FOUND, "{}".to_string())
        }
    })
    .await;

    assert_eq!(client(&upstream).shape_name().await.unwrap(), "tenshi");
    let req = &upstream.requests()[0];
    assert_eq!(req.method, axum::http::Method::GET);
    assert_eq!(req.header("authorization"), Some("Bearer test-key"));
}

#[tokio::test]
async fn test_min_interval_spaces_requests() {
    let upstream = MockUpstream::start(|_| (StatusCode::OK, completion("ok"))).await;
    let client = client(&upstream).with_min_interval(Duration::from_millis(200));

    let started = Instant::now();
    for _ in 0..2 {
        client
            .complete(CompletionRequest::single("tenshi", "hi"))
            .await
            .unwrap();
    }
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(upstream.requests().len(), 2);
}

#[tokio::test]
async fn test_raw_passthrough() {
    let upstream = MockUpstream::start(|req| {
        if req.path.ends_with("/models") {
            (StatusCode::OK, json!({"data": [{"id": "shapesinc/tenshi"}]}).to_string())
        } else {
            (StatusCode::BAD_REQUEST, "nope".to_string())
        }
    })
    .await;
    let client = client(&upstream);

    let (status, body) = client
        .raw_completion(&json!({"model": "shapesinc/tenshi", "messages": []}), Some("u"), None)
        .await
        .unwrap();
    assert_eq!(status, 400);
    assert_eq!(body, "nope");
    assert_eq!(upstream.requests()[0].header("x-user-id"), Some("u"));

    let (status, body) = client.list_models().await.unwrap();
    assert_eq!(status, 200);
    assert!(body.contains("shapesinc/tenshi"));
}
