//! Rate limit headers and denial responses.

use axum::{
    Json,
    body::Body,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use rate_limit::{EvaluationResult, LimitType};
use serde::Serialize;

const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");

#[derive(Debug, Serialize)]
struct DenialBody<'a> {
    error: &'static str,
    message: &'a str,
    limit: u32,
    remaining: u32,
    reset_time: u64,
    retry_after: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_type: Option<LimitType>,
}

#[derive(Debug, Serialize)]
struct UnavailableBody {
    error: &'static str,
    message: &'static str,
}

const UNAVAILABLE_MESSAGE: &str = "Rate limiting is temporarily unavailable";

/// Decorates responses with limit headers and renders denials.
///
/// Callers that speak JSON (by `Accept` or `Content-Type`) and every path under the
/// protected prefix get a structured body; anything else gets one line of text.
#[derive(Debug, Clone)]
pub(crate) struct ResponseAnnotator {
    protected_prefix: String,
}

impl ResponseAnnotator {
    pub fn new(protected_prefix: impl Into<String>) -> Self {
        Self {
            protected_prefix: protected_prefix.into(),
        }
    }

    /// Adds the limit headers, plus `retry-after` for rejections.
    pub fn annotate(&self, headers: &mut HeaderMap, result: &EvaluationResult) {
        headers.insert(LIMIT, HeaderValue::from(result.limit));
        headers.insert(REMAINING, HeaderValue::from(result.remaining));
        headers.insert(RESET, HeaderValue::from(result.reset_time));
        headers.insert(WINDOW, HeaderValue::from(result.window.as_secs()));

        if let Some(retry_after) = result.retry_after_secs() {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
    }

    /// A 429 for a denied request.
    pub fn deny(&self, path: &str, request_headers: &HeaderMap, result: &EvaluationResult) -> Response<Body> {
        let retry_after = result.retry_after_secs().unwrap_or_default();
        let message = denial_message(result, retry_after);

        let mut response = if self.is_structured(path, request_headers) {
            let body = DenialBody {
                error: "rate_limit_exceeded",
                message: &message,
                limit: result.limit,
                remaining: result.remaining,
                reset_time: result.reset_time,
                retry_after,
                limit_type: (result.limit_type == LimitType::Burst).then_some(LimitType::Burst),
            };

            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        } else {
            (StatusCode::TOO_MANY_REQUESTS, message).into_response()
        };

        self.annotate(response.headers_mut(), result);
        response
    }

    /// A 500 for a request that could not be checked while failing closed.
    pub fn unavailable(&self, path: &str, request_headers: &HeaderMap) -> Response<Body> {
        if self.is_structured(path, request_headers) {
            let body = UnavailableBody {
                error: "rate_limit_unavailable",
                message: UNAVAILABLE_MESSAGE,
            };

            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, UNAVAILABLE_MESSAGE).into_response()
        }
    }

    fn is_structured(&self, path: &str, headers: &HeaderMap) -> bool {
        let mentions_json = |name: HeaderName| {
            headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .any(|value| value.contains("application/json"))
        };

        path.starts_with(&self.protected_prefix) || mentions_json(header::ACCEPT) || mentions_json(header::CONTENT_TYPE)
    }
}

fn denial_message(result: &EvaluationResult, retry_after: u64) -> String {
    match result.limit_type {
        LimitType::Burst => format!("Too many requests in a short period. Try again in {retry_after} seconds."),
        LimitType::Sustained => format!(
            "Rate limit of {} requests per {} seconds exceeded. Try again in {retry_after} seconds.",
            result.limit,
            result.window.as_secs()
        ),
    }
}
