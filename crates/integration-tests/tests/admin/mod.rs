//! Operator endpoints for inspecting and clearing windows.

use indoc::indoc;
use integration_tests::TestServer;
use reqwest::Method;
use serde_json::{Value, json};

const CONFIG: &str = indoc! {r#"
    [admin]
    enabled = true

    [rate_limits.policies.general]
    requests = 3
    window = "1m"

    [rate_limits.policies.general-anonymous]
    requests = 2
    window = "1m"
"#};

const CALLER: &str = "203.0.113.7";

async fn status(server: &TestServer, identifier: &str) -> (u16, Value) {
    let response = server
        .client
        .get(&format!("/admin/rate-limits/{identifier}"))
        .await;

    (response.status().as_u16(), response.json().await.unwrap())
}

/// Windows that have seen traffic, with `reset_time` redacted.
fn in_use(status: &Value) -> Vec<Value> {
    status["limits"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|limit| limit["used"] != json!(0))
        .map(|limit| {
            let mut limit = limit.clone();

            assert!(limit["reset_time"].is_u64(), "reset_time missing from {limit}");
            limit["reset_time"] = json!("[reset_time]");

            limit
        })
        .collect()
}

async fn reset(server: &TestServer, identifier: &str, category: Option<&str>) -> (u16, Value) {
    let path = match category {
        Some(category) => format!("/admin/rate-limits/{identifier}?category={category}"),
        None => format!("/admin/rate-limits/{identifier}"),
    };

    let response = server.client.request(Method::DELETE, &path).send().await.unwrap();

    (response.status().as_u16(), response.json().await.unwrap())
}

#[tokio::test]
async fn status_reports_used_windows() {
    let server = TestServer::start(CONFIG).await;

    for _ in 1..=2 {
        server.client.forward_auth("/api/projects", CALLER, None).await;
    }

    let (status_code, body) = status(&server, "ip:203.0.113.7").await;

    assert_eq!(status_code, 200);
    assert_eq!(body["identifier"], json!("ip:203.0.113.7"));

    insta::assert_json_snapshot!(in_use(&body), @r#"
    [
      {
        "category": "general",
        "limit_type": "sustained",
        "limit": 3,
        "used": 2,
        "remaining": 1,
        "window": 60,
        "reset_time": "[reset_time]"
      },
      {
        "category": "general-anonymous",
        "limit_type": "sustained",
        "limit": 2,
        "used": 2,
        "remaining": 0,
        "window": 60,
        "reset_time": "[reset_time]"
      }
    ]
    "#);
}

#[tokio::test]
async fn status_of_an_unseen_identifier_is_empty() {
    let server = TestServer::start(CONFIG).await;

    let (status_code, body) = status(&server, "user:42").await;
    assert_eq!(status_code, 200);

    let limits = body["limits"].as_array().unwrap();

    assert!(!limits.is_empty());
    assert!(limits.iter().all(|limit| limit["used"] == json!(0)));
    assert!(limits.iter().all(|limit| limit.get("reset_time").is_none()));

    let burst = limits
        .iter()
        .find(|limit| limit["category"] == json!("upload") && limit["limit_type"] == json!("burst"))
        .unwrap();

    insta::assert_json_snapshot!(burst, @r#"
    {
      "category": "upload",
      "limit_type": "burst",
      "limit": 5,
      "used": 0,
      "remaining": 5,
      "window": 60
    }
    "#);
}

#[tokio::test]
async fn status_does_not_count_as_a_request() {
    let server = TestServer::start(CONFIG).await;

    for _ in 1..=3 {
        status(&server, "ip:203.0.113.7").await;
    }

    let response = server.client.forward_auth("/api/projects", CALLER, None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
}

#[tokio::test]
async fn reset_one_category() {
    let server = TestServer::start(CONFIG).await;

    for _ in 1..=2 {
        server.client.forward_auth("/api/projects", CALLER, None).await;
    }

    let response = server.client.forward_auth("/api/projects", CALLER, None).await;
    assert_eq!(response.status(), 429);

    let (status_code, body) = reset(&server, "ip:203.0.113.7", Some("general-anonymous")).await;
    assert_eq!(status_code, 200);
    insta::assert_json_snapshot!(body, @r#"
    {
      "deleted": 1
    }
    "#);

    // General kept its three recorded requests, so it is the next to run out.
    let response = server.client.forward_auth("/api/projects", CALLER, None).await;
    assert_eq!(response.status(), 429);
    assert_eq!(response.headers()["x-ratelimit-limit"], "3");
}

#[tokio::test]
async fn reset_every_category() {
    let server = TestServer::start(CONFIG).await;

    for _ in 1..=3 {
        server.client.forward_auth("/api/projects", CALLER, None).await;
    }

    let (status_code, body) = reset(&server, "ip:203.0.113.7", None).await;
    assert_eq!(status_code, 200);
    insta::assert_json_snapshot!(body, @r#"
    {
      "deleted": 2
    }
    "#);

    let (_, body) = status(&server, "ip:203.0.113.7").await;
    assert!(in_use(&body).is_empty());

    let response = server.client.forward_auth("/api/projects", CALLER, None).await;
    assert_eq!(response.status(), 200);

    // Nothing left to delete the second time around.
    let (_, body) = reset(&server, "ip:203.0.113.7", None).await;
    assert_eq!(body["deleted"], json!(2));

    let (_, body) = reset(&server, "ip:203.0.113.7", None).await;
    assert_eq!(body["deleted"], json!(0));
}

#[tokio::test]
async fn reset_leaves_other_identifiers_alone() {
    let server = TestServer::start(CONFIG).await;

    for user in ["42", "43"] {
        server.client.forward_auth("/api/projects", CALLER, Some(user)).await;
    }

    reset(&server, "user:42", None).await;

    let (_, body) = status(&server, "user:43").await;
    let used: Vec<Value> = in_use(&body).iter().map(|limit| limit["used"].clone()).collect();

    assert_eq!(used, vec![json!(1)]);
}

#[tokio::test]
async fn invalid_identifier() {
    let server = TestServer::start(CONFIG).await;

    let (status_code, body) = status(&server, "bob").await;

    assert_eq!(status_code, 400);
    insta::assert_json_snapshot!(body, @r#"
    {
      "error": "invalid_identifier",
      "message": "Invalid identifier 'bob', expected 'user:<id>' or 'ip:<address>'"
    }
    "#);
}

#[tokio::test]
async fn unknown_category() {
    let server = TestServer::start(CONFIG).await;

    let (status_code, body) = reset(&server, "user:42", Some("reports")).await;

    assert_eq!(status_code, 404);
    insta::assert_json_snapshot!(body, @r#"
    {
      "error": "unknown_category",
      "message": "No rate limit policy is registered for category 'reports'"
    }
    "#);
}

#[tokio::test]
async fn disabled_by_default() {
    let server = TestServer::start("").await;

    let response = server.client.get("/admin/rate-limits/user:42").await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn custom_path() {
    let config = indoc! {r#"
        [admin]
        enabled = true
        path = "/ops/limits/"
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.get("/ops/limits/user:42").await;
    assert_eq!(response.status(), 200);
}
