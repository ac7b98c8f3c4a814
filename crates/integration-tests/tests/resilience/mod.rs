//! Behaviour when the shared store cannot be reached.

use std::time::{Duration, Instant};

use indoc::formatdoc;
use integration_tests::TestServer;

/// A Redis store nobody listens on. The port is reserved and refuses connections.
fn unreachable_store(failure_mode: &str) -> String {
    formatdoc! {r#"
        [admin]
        enabled = true

        [rate_limits]
        failure_mode = "{failure_mode}"

        [rate_limits.storage]
        type = "redis"
        url = "redis://127.0.0.1:1/0"
        response_timeout = "250ms"
    "#}
}

#[tokio::test]
async fn startup_survives_an_unreachable_store() {
    let server = TestServer::start(&unreachable_store("open")).await;

    let response = server.client.get("/health").await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn failing_open_lets_requests_through_unannotated() {
    let server = TestServer::start(&unreachable_store("open")).await;

    for _ in 1..=3 {
        let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;

        assert_eq!(response.status(), 200);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    let response = server.client.get("/api/projects").await;
    assert_eq!(response.status(), 200);
    insta::assert_snapshot!(response.text().await.unwrap(), @"projects");
}

#[tokio::test]
async fn failing_closed_rejects_with_a_server_error() {
    let server = TestServer::start(&unreachable_store("closed")).await;

    let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
    assert_eq!(response.status(), 500);
    insta::assert_snapshot!(response.text().await.unwrap(), @r#"{"error":"rate_limit_unavailable","message":"Rate limiting is temporarily unavailable"}"#);

    let response = server.client.get("/api/projects").await;
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn exempt_paths_never_touch_the_store() {
    let server = TestServer::start(&unreachable_store("closed")).await;

    let response = server.client.get("/api/health").await;
    assert_eq!(response.status(), 200);

    let response = server.client.get("/public").await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn store_failures_are_bounded_by_the_response_timeout() {
    let server = TestServer::start(&unreachable_store("open")).await;

    let started = Instant::now();
    let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;

    assert_eq!(response.status(), 200);
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn admin_reports_an_unavailable_store() {
    let server = TestServer::start(&unreachable_store("open")).await;

    let response = server.client.get("/admin/rate-limits/user:42").await;
    assert_eq!(response.status(), 503);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "storage_unavailable");
}
