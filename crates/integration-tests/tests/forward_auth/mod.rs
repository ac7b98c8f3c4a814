//! The decision endpoint as a reverse proxy uses it.

use indoc::indoc;
use integration_tests::TestServer;
use serde_json::{Value, json};

const TIGHT_LIMITS: &str = indoc! {r#"
    [rate_limits.policies.general]
    requests = 3
    window = "1m"

    [rate_limits.policies.general-anonymous]
    requests = 2
    window = "1m"

    [rate_limits.policies.strict-anonymous]
    requests = 1
    window = "1m"
"#};

fn header(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .map(|value| value.to_str().unwrap_or("invalid").to_string())
}

/// The limit headers without `x-ratelimit-reset`, which depends on the wall clock.
fn limit_headers(response: &reqwest::Response) -> Value {
    json!({
        "status": response.status().as_u16(),
        "limit": header(response, "x-ratelimit-limit"),
        "remaining": header(response, "x-ratelimit-remaining"),
        "window": header(response, "x-ratelimit-window"),
        "retry_after": header(response, "retry-after"),
    })
}

/// The denial body with `reset_time` redacted.
async fn denial_body(response: reqwest::Response) -> Value {
    let mut body: Value = response.json().await.unwrap();

    assert!(body["reset_time"].is_u64(), "reset_time missing from {body}");
    body["reset_time"] = json!("[reset_time]");

    body
}

#[tokio::test]
async fn anonymous_callers_are_limited_by_address() {
    let server = TestServer::start(TIGHT_LIMITS).await;

    let mut results = Vec::new();

    for _ in 1..=3 {
        let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
        results.push(limit_headers(&response));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "status": 200,
        "limit": "3",
        "remaining": "1",
        "window": "60",
        "retry_after": null
      },
      {
        "status": 200,
        "limit": "3",
        "remaining": "0",
        "window": "60",
        "retry_after": null
      },
      {
        "status": 429,
        "limit": "2",
        "remaining": "0",
        "window": "60",
        "retry_after": "60"
      }
    ]
    "#);
}

#[tokio::test]
async fn reset_header_is_in_the_future() {
    let server = TestServer::start(TIGHT_LIMITS).await;

    let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
    let reset: u64 = header(&response, "x-ratelimit-reset").unwrap().parse().unwrap();

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();

    assert!(reset > now, "reset {reset} is not after {now}");
    assert!(reset <= now + 61, "reset {reset} is further than a window from {now}");
}

#[tokio::test]
async fn denial_body_is_structured_for_api_paths() {
    let server = TestServer::start(TIGHT_LIMITS).await;

    for _ in 1..=2 {
        let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
        assert_eq!(response.status(), 200);
    }

    let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
    assert_eq!(response.status(), 429);

    insta::assert_json_snapshot!(denial_body(response).await, @r#"
    {
      "error": "rate_limit_exceeded",
      "message": "Rate limit of 2 requests per 60 seconds exceeded. Try again in 60 seconds.",
      "limit": 2,
      "remaining": 0,
      "reset_time": "[reset_time]",
      "retry_after": 60
    }
    "#);
}

#[tokio::test]
async fn addresses_have_independent_windows() {
    let server = TestServer::start(TIGHT_LIMITS).await;

    let mut results = Vec::new();

    for (ip, attempts) in [("203.0.113.7", 3), ("198.51.100.4", 2)] {
        for request in 1..=attempts {
            let response = server.client.forward_auth("/api/projects", ip, None).await;

            results.push(json!({
                "ip": ip,
                "request": request,
                "status": response.status().as_u16(),
            }));
        }
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "ip": "203.0.113.7",
        "request": 1,
        "status": 200
      },
      {
        "ip": "203.0.113.7",
        "request": 2,
        "status": 200
      },
      {
        "ip": "203.0.113.7",
        "request": 3,
        "status": 429
      },
      {
        "ip": "198.51.100.4",
        "request": 1,
        "status": 200
      },
      {
        "ip": "198.51.100.4",
        "request": 2,
        "status": 200
      }
    ]
    "#);
}

#[tokio::test]
async fn only_the_first_forwarded_address_counts() {
    let server = TestServer::start(TIGHT_LIMITS).await;

    for proxy in ["10.0.0.1", "10.0.0.2"] {
        let chain = format!("203.0.113.7, {proxy}");
        let response = server.client.forward_auth("/api/projects", &chain, None).await;
        assert_eq!(response.status(), 200);
    }

    let response = server
        .client
        .forward_auth("/api/projects", "203.0.113.7, 10.0.0.3", None)
        .await;

    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn authenticated_callers_are_limited_by_account() {
    let server = TestServer::start(TIGHT_LIMITS).await;

    let mut results = Vec::new();

    // Same address, different accounts, and the address itself anonymously.
    for (user, attempts) in [(Some("42"), 4), (Some("43"), 1), (None, 1)] {
        for request in 1..=attempts {
            let response = server.client.forward_auth("/api/projects", "203.0.113.7", user).await;

            results.push(json!({
                "user": user,
                "request": request,
                "status": response.status().as_u16(),
                "remaining": header(&response, "x-ratelimit-remaining"),
            }));
        }
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "user": "42",
        "request": 1,
        "status": 200,
        "remaining": "2"
      },
      {
        "user": "42",
        "request": 2,
        "status": 200,
        "remaining": "1"
      },
      {
        "user": "42",
        "request": 3,
        "status": 200,
        "remaining": "0"
      },
      {
        "user": "42",
        "request": 4,
        "status": 429,
        "remaining": "0"
      },
      {
        "user": "43",
        "request": 1,
        "status": 200,
        "remaining": "2"
      },
      {
        "user": null,
        "request": 1,
        "status": 200,
        "remaining": "1"
      }
    ]
    "#);
}

#[tokio::test]
async fn sensitive_paths_use_the_strict_anonymous_policy() {
    let server = TestServer::start(TIGHT_LIMITS).await;

    let response = server.client.forward_auth("/api/auth/login", "203.0.113.7", None).await;
    assert_eq!(response.status(), 200);

    let response = server.client.forward_auth("/api/auth/login", "203.0.113.7", None).await;
    assert_eq!(response.status(), 429);

    insta::assert_json_snapshot!(denial_body(response).await, @r#"
    {
      "error": "rate_limit_exceeded",
      "message": "Rate limit of 1 requests per 60 seconds exceeded. Try again in 60 seconds.",
      "limit": 1,
      "remaining": 0,
      "reset_time": "[reset_time]",
      "retry_after": 60
    }
    "#);

    // Signed in, the same path is only limited by its endpoint category and general.
    let response = server
        .client
        .forward_auth("/api/auth/login", "203.0.113.7", Some("42"))
        .await;

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn burst_window_denies_first() {
    let config = indoc! {r#"
        [rate_limits.policies.general]
        requests = 100
        window = "1m"
        burst = { requests = 2, window = "10s" }
    "#};

    let server = TestServer::start(config).await;

    for _ in 1..=2 {
        let response = server.client.forward_auth("/api/projects", "203.0.113.7", Some("42")).await;
        assert_eq!(response.status(), 200);
    }

    let response = server.client.forward_auth("/api/projects", "203.0.113.7", Some("42")).await;
    assert_eq!(response.status(), 429);
    insta::assert_json_snapshot!(limit_headers(&response), @r#"
    {
      "status": 429,
      "limit": "2",
      "remaining": "0",
      "window": "10",
      "retry_after": "10"
    }
    "#);

    insta::assert_json_snapshot!(denial_body(response).await, @r#"
    {
      "error": "rate_limit_exceeded",
      "message": "Too many requests in a short period. Try again in 10 seconds.",
      "limit": 2,
      "remaining": 0,
      "reset_time": "[reset_time]",
      "retry_after": 10,
      "limit_type": "burst"
    }
    "#);
}

#[tokio::test]
async fn endpoint_categories_are_checked_alongside_general() {
    let config = indoc! {r#"
        [rate_limits.policies.upload]
        requests = 1
        window = "1m"
    "#};

    let server = TestServer::start(config).await;

    let response = server
        .client
        .forward_auth("/api/upload/file", "203.0.113.7", Some("42"))
        .await;

    insta::assert_json_snapshot!(limit_headers(&response), @r#"
    {
      "status": 200,
      "limit": "1000",
      "remaining": "0",
      "window": "3600",
      "retry_after": null
    }
    "#);

    let response = server
        .client
        .forward_auth("/api/upload/file", "203.0.113.7", Some("42"))
        .await;

    assert_eq!(response.status(), 429);

    // Other endpoints still have general budget left.
    let response = server.client.forward_auth("/api/projects", "203.0.113.7", Some("42")).await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn query_strings_and_absolute_uris_resolve_to_the_path() {
    let server = TestServer::start(TIGHT_LIMITS).await;

    for uri in ["/api/projects?page=2", "https://app.example.com/api/projects"] {
        let response = server.client.forward_auth(uri, "203.0.113.7", None).await;
        assert_eq!(response.status(), 200);
    }

    let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn unprotected_paths_are_not_annotated() {
    let server = TestServer::start(TIGHT_LIMITS).await;

    let mut results = Vec::new();

    for uri in ["/api/health", "/public", "/"] {
        for _ in 1..=3 {
            let response = server.client.forward_auth(uri, "203.0.113.7", None).await;
            results.push(json!({ "uri": uri, "headers": limit_headers(&response) }));
        }
    }

    assert!(
        results.iter().all(|result| result["headers"]
            == json!({
                "status": 200,
                "limit": null,
                "remaining": null,
                "window": null,
                "retry_after": null,
            })),
        "{results:#?}"
    );
}

#[tokio::test]
async fn missing_uri_header_is_a_bad_request() {
    let server = TestServer::start("").await;

    let response = server
        .client
        .request(reqwest::Method::GET, "/auth")
        .header("x-forwarded-for", "203.0.113.7")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    insta::assert_snapshot!(response.text().await.unwrap(), @"Missing or invalid x-forwarded-uri header");
}

#[tokio::test]
async fn custom_headers_and_path() {
    let config = indoc! {r#"
        [server.forward_auth]
        path = "/decide"
        uri_header = "x-original-uri"
        user_header = "x-user-id"

        [rate_limits.policies.general]
        requests = 1
        window = "1m"
    "#};

    let server = TestServer::start(config).await;

    let decide = || {
        server
            .client
            .request(reqwest::Method::GET, "/decide")
            .header("x-original-uri", "/api/projects")
            .header("x-forwarded-for", "203.0.113.7")
            .header("x-user-id", "42")
            .send()
    };

    assert_eq!(decide().await.unwrap().status(), 200);
    assert_eq!(decide().await.unwrap().status(), 429);
}

#[tokio::test]
async fn disabled_rate_limiting_allows_everything() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = false

        [rate_limits.policies.general-anonymous]
        requests = 1
        window = "1m"
    "#};

    let server = TestServer::start(config).await;

    let mut success_count = 0;

    for _ in 1..=10 {
        let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;

        if response.status() == 200 && header(&response, "x-ratelimit-limit").is_none() {
            success_count += 1;
        }
    }

    assert_eq!(success_count, 10);
}

#[tokio::test]
async fn permissive_mode_uses_the_permissive_table() {
    let config = indoc! {r#"
        [rate_limits]
        mode = "permissive"

        [rate_limits.policies.general-anonymous]
        requests = 1
        window = "1m"
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.forward_auth("/api/projects", "203.0.113.7", None).await;
    insta::assert_json_snapshot!(limit_headers(&response), @r#"
    {
      "status": 200,
      "limit": "10000",
      "remaining": "999",
      "window": "3600",
      "retry_after": null
    }
    "#);
}
