//! Rate limiting middleware for HTTP requests.

use std::{
    fmt::Display,
    future::Future,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{body::Body, extract::ConnectInfo};
use http::{Extensions, HeaderMap, HeaderName, Request, Response};
use rate_limit::{AuthState, RateLimitEvaluator, RateLimitRequest, Verdict};
use tower::Layer;

use crate::annotate::ResponseAnnotator;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// The evaluator together with the annotator that renders its verdicts.
#[derive(Clone)]
pub(crate) struct Limiter {
    pub evaluator: Arc<RateLimitEvaluator>,
    pub annotator: Arc<ResponseAnnotator>,
    user_header: HeaderName,
}

impl Limiter {
    pub fn new(evaluator: Arc<RateLimitEvaluator>, protected_prefix: &str, user_header: HeaderName) -> Self {
        Self {
            evaluator,
            annotator: Arc::new(ResponseAnnotator::new(protected_prefix)),
            user_header,
        }
    }

    /// An [`AuthState`] extension wins. Otherwise the account id header set by an
    /// authenticating proxy is used, and without it the caller is anonymous.
    pub fn auth_state(&self, headers: &HeaderMap, extensions: &Extensions) -> AuthState {
        if let Some(auth) = extensions.get::<AuthState>() {
            return auth.clone();
        }

        match headers.get(&self.user_header).and_then(|value| value.to_str().ok()) {
            Some(account_id) if !account_id.trim().is_empty() => AuthState::authenticated(account_id.trim()),
            _ => AuthState::Anonymous,
        }
    }
}

/// Limits the wrapped routes. The caller is identified as described in
/// [`Limiter::auth_state`].
#[derive(Clone)]
pub struct RateLimitLayer(Limiter);

impl RateLimitLayer {
    pub(crate) fn new(limiter: Limiter) -> Self {
        Self(limiter)
    }
}

impl<Service> Layer<Service> for RateLimitLayer
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            limiter: self.0.clone(),
        }
    }
}

/// Service produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitService<Service> {
    next: Service,
    limiter: Limiter,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();
            let auth = limiter.auth_state(req.headers(), req.extensions());
            let rate_limit_request = describe(&path, auth, req.headers(), req.extensions());

            let verdict = match limiter.evaluator.evaluate_request(&rate_limit_request).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    log::debug!("Request to {path} rejected, rate limits could not be checked: {err}");
                    return Ok(limiter.annotator.unavailable(&path, req.headers()));
                }
            };

            match verdict {
                Verdict::Unrestricted => next.call(req).await,
                Verdict::Allowed(result) => {
                    let mut response = next.call(req).await?;
                    limiter.annotator.annotate(response.headers_mut(), &result);

                    Ok(response)
                }
                Verdict::Denied(result) => Ok(limiter.annotator.deny(&path, req.headers(), &result)),
            }
        })
    }
}

/// Collects what the evaluator needs from a request.
pub(crate) fn describe(path: &str, auth: AuthState, headers: &HeaderMap, extensions: &Extensions) -> RateLimitRequest {
    let mut builder = RateLimitRequest::builder().path(path).auth(auth);

    if let Some(ip) = peer_ip(extensions) {
        builder = builder.ip(ip);
    }

    if let Some(forwarded_for) = headers.get(FORWARDED_FOR).and_then(|value| value.to_str().ok()) {
        builder = builder.forwarded_for(forwarded_for);
    }

    builder.build()
}

fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip())
}
