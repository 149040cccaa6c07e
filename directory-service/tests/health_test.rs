mod common;

use axum::http::StatusCode;
use common::TestApp;

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::spawn();

    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "directory-service");
}

#[tokio::test]
async fn test_readiness_check() {
    let app = TestApp::spawn();

    let (status, body) = app.get("/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = TestApp::spawn();

    let (status, _) = app.get("/api/unknown").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
