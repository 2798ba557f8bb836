mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use common::FakeBackend;
use cyperf_monitor::server::build_router;
use cyperf_monitor::session::MonitorSession;
use cyperf_monitor::state::AppState;

fn test_router() -> axum::Router {
    let session = MonitorSession::new(Arc::new(FakeBackend::new()), Duration::from_secs(1));
    build_router(Arc::new(AppState::new(session, "http://127.0.0.1:5001")))
}

async fn send(router: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_reports_backend() {
    let (status, body) = send(test_router(), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["api_url"], "http://127.0.0.1:5001");
    assert!(body["monitoring"].is_null());
}

#[tokio::test]
async fn test_select_then_view_session() {
    let router = test_router();

    let (status, body) = send(router.clone(), "POST", "/session/select/abcdef123456").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["test_id"], "abcdef123456");
    assert_eq!(body["short_id"], "abcdef12");

    let (status, body) = send(router.clone(), "GET", "/session").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["test_id"], "abcdef123456");
    assert_eq!(body["server_table"]["rows"], Value::Array(vec![]));

    let (status, body) = send(router.clone(), "POST", "/session/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stopped"], true);

    let (_, body) = send(router, "GET", "/session").await;
    assert!(body["test_id"].is_null());
}

#[tokio::test]
async fn test_cancel_without_selection_conflicts() {
    let (status, body) = send(test_router(), "POST", "/session/cancel").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "No test selected");
}

#[tokio::test]
async fn test_log_history_respects_limit() {
    let router = test_router();
    send(router.clone(), "POST", "/session/select/one").await;
    send(router.clone(), "POST", "/session/select/two").await;

    let (status, body) = send(router, "GET", "/logs/history?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["message"], "Monitoring test two");
    assert_eq!(entries[0]["source"], "session");
}

#[tokio::test]
async fn test_log_stream_is_event_stream() {
    let response = test_router()
        .oneshot(
            Request::builder()
                .uri("/logs/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );
}
