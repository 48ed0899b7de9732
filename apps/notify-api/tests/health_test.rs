mod common;

use axum::http::StatusCode;
use axum_test::TestServer;

#[tokio::test]
async fn health_reports_ok() {
    let (app, _) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server.get("/health").await;
    resp.assert_status(StatusCode::OK);

    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"].as_str(), Some("ok"));
}
