//! Service liveness tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -- --ignored

mod common;

use common::TestApp;

#[tokio::test]
#[ignore]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = app.get("/health").await;
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "returns-service");
}

#[tokio::test]
#[ignore]
async fn readiness_check_works() {
    let app = TestApp::spawn().await;

    let response = app.get("/ready").await;
    assert!(response.status().is_success());
}

#[tokio::test]
#[ignore]
async fn metrics_endpoint_exposes_prometheus_text() {
    let app = TestApp::spawn().await;

    // Drive one repository query so the duration histogram has a sample
    let response = app.get("/returns").await;
    assert!(response.status().is_success());

    let response = app.get("/metrics").await;
    assert!(response.status().is_success());

    let body = response.text().await.expect("Failed to read metrics body");
    assert!(body.contains("returns_db_query_duration_seconds"));
}
