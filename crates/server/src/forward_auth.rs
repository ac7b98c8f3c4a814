//! Decision endpoint for reverse proxies.
//!
//! The proxy asks before forwarding: the original URI, the client address chain and the
//! account id it already authenticated arrive as headers. The answer is 200 or 429, with
//! the limit headers either way.

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Response},
    routing::get,
};
use config::ForwardAuthConfig;
use http::{HeaderName, StatusCode, Uri};
use rate_limit::Verdict;

use crate::rate_limit::{Limiter, describe};

#[derive(Clone)]
struct ForwardAuthState {
    limiter: Limiter,
    uri_header: HeaderName,
}

pub(crate) fn router(config: &ForwardAuthConfig, limiter: Limiter) -> anyhow::Result<Router> {
    let uri_header = HeaderName::try_from(config.uri_header.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid forward_auth.uri_header '{}': {e}", config.uri_header))?;

    let state = ForwardAuthState { limiter, uri_header };

    Ok(Router::new().route(&config.path, get(decide)).with_state(state))
}

async fn decide(State(state): State<ForwardAuthState>, request: Request) -> Response<Body> {
    let (parts, _) = request.into_parts();
    let headers = &parts.headers;

    let Some(path) = headers
        .get(&state.uri_header)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Uri>().ok())
        .map(|uri| uri.path().to_string())
    else {
        log::debug!("Forward-auth request without a usable {} header", state.uri_header);

        let message = format!("Missing or invalid {} header", state.uri_header);
        return (StatusCode::BAD_REQUEST, message).into_response();
    };

    let limiter = &state.limiter;
    let auth = limiter.auth_state(headers, &parts.extensions);
    let rate_limit_request = describe(&path, auth, headers, &parts.extensions);

    match limiter.evaluator.evaluate_request(&rate_limit_request).await {
        Ok(Verdict::Unrestricted) => StatusCode::OK.into_response(),
        Ok(Verdict::Allowed(result)) => {
            let mut response = StatusCode::OK.into_response();
            limiter.annotator.annotate(response.headers_mut(), &result);

            response
        }
        Ok(Verdict::Denied(result)) => limiter.annotator.deny(&path, headers, &result),
        Err(_) => limiter.annotator.unavailable(&path, headers),
    }
}
