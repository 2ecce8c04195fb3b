//! HTTP surface tests for /health and /metrics

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use pitr_core::PitrMetrics;
use pitr_server::api;
use std::sync::Arc;
use tower::ServiceExt;

/// Test helper to make HTTP requests
async fn make_request(app: &Router, method: Method, uri: &str) -> (StatusCode, Option<String>, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, String::from_utf8(body_bytes.to_vec()).unwrap_or_default())
}

#[tokio::test]
async fn test_health_check() {
    let app = api::router(Arc::new(PitrMetrics::new()));
    let (status, _, body) = make_request(&app, Method::GET, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_metrics_reflect_counters() {
    let metrics = Arc::new(PitrMetrics::new());
    let app = api::router(metrics.clone());

    let (status, content_type, body) = make_request(&app, Method::GET, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/plain"));
    assert!(body.contains("pitr_binlogs_uploaded_total 0"));

    metrics.record_upload(1024, 1_700_000_000);
    metrics.record_cycle(true);
    let (_, _, body) = make_request(&app, Method::GET, "/metrics").await;
    assert!(body.contains("pitr_binlogs_uploaded_total 1"));
    assert!(body.contains("pitr_bytes_uploaded_total 1024"));
    assert!(body.contains("pitr_collect_cycles_total{result=\"success\"} 1"));
}

#[tokio::test]
async fn test_unknown_route() {
    let app = api::router(Arc::new(PitrMetrics::new()));
    let (status, _, _) = make_request(&app, Method::GET, "/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_to_health_not_allowed() {
    let app = api::router(Arc::new(PitrMetrics::new()));
    let (status, _, _) = make_request(&app, Method::POST, "/health").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
