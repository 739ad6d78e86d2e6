//! E2E tests for health check, metrics and basic server functionality

mod common;

use common::TestServer;

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let response = server.get("/health", None).await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_index_without_cycle() {
    let server = TestServer::new().await;

    let response = server.get("/", None).await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["cycle"].is_null());
    assert_eq!(body["movies"].as_array().unwrap().len(), 0);
    assert_eq!(body["voting_enabled"], false);
    assert!(body["user"].is_null());
}

#[tokio::test]
async fn test_404_for_unknown_routes() {
    let server = TestServer::new().await;

    let response = server.get("/unknown/route", None).await;
    assert_eq!(response.status(), 404);

    let response = server.get("/movie/999", None).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_metrics_endpoint_counts_requests() {
    let server = TestServer::new().await;
    server.get("/health", None).await;

    let response = server.get("/metrics", None).await;
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    assert!(body.contains("moviepolls_http_requests_total"));
    assert!(body.contains("endpoint=\"/health\""));
}

#[tokio::test]
async fn test_posters_are_served() {
    let server = TestServer::new().await;
    let posters = server.state.posters.dir().to_path_buf();
    tokio::fs::create_dir_all(&posters).await.unwrap();
    tokio::fs::write(posters.join("tmdb-949.jpg"), b"jpeg bytes")
        .await
        .unwrap();

    let response = server.get("/posters/tmdb-949.jpg", None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"jpeg bytes");
}
