use std::time::Duration;

use indoc::indoc;
use integration_tests::TestServer;

use super::concurrent_admissions;

#[tokio::test]
async fn atomic_counter_never_over_admits() {
    let config = indoc! {r#"
        [rate_limits]
        counter = "atomic"

        [rate_limits.policies.general]
        requests = 100
        window = "1m"

        [rate_limits.policies.general-anonymous]
        requests = 5
        window = "1m"
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(concurrent_admissions(&server.client, 25).await, 5);
}

#[tokio::test]
async fn window_slides() {
    let config = indoc! {r#"
        [rate_limits.policies.general]
        requests = 100
        window = "1m"

        [rate_limits.policies.general-anonymous]
        requests = 2
        window = "1s"
    "#};

    let server = TestServer::start(config).await;

    let mut statuses = Vec::new();

    for _ in 1..=3 {
        let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
        statuses.push(response.status().as_u16());
    }

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
    statuses.push(response.status().as_u16());

    assert_eq!(statuses, vec![200, 200, 429, 200]);
}

#[tokio::test]
async fn retry_after_counts_down() {
    let config = indoc! {r#"
        [rate_limits.policies.general]
        requests = 100
        window = "1m"

        [rate_limits.policies.general-anonymous]
        requests = 1
        window = "5s"
    "#};

    let server = TestServer::start(config).await;

    server.client.forward_auth("/api/projects", "203.0.113.7", None).await;

    let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
    assert_eq!(response.headers()["retry-after"], "5");

    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
    assert_eq!(response.headers()["retry-after"], "3");
}
