//! Request information for rate limiting.

use std::net::IpAddr;

use crate::AuthState;

/// The parts of an incoming request that decide how it is limited.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRequest {
    /// Request path, without the query string.
    pub path: String,
    /// Authentication state established upstream.
    pub auth: AuthState,
    /// Address of the connecting peer.
    pub ip: Option<IpAddr>,
    /// Raw `X-Forwarded-For` header value.
    pub forwarded_for: Option<String>,
}

impl RateLimitRequest {
    /// Create a new builder for a rate limit request.
    pub fn builder() -> RateLimitRequestBuilder {
        RateLimitRequestBuilder::default()
    }
}

/// Builder for creating rate limit requests.
#[derive(Debug, Default)]
pub struct RateLimitRequestBuilder {
    request: RateLimitRequest,
}

impl RateLimitRequestBuilder {
    /// Set the request path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.request.path = path.into();
        self
    }

    /// Set the authentication state.
    pub fn auth(mut self, auth: AuthState) -> Self {
        self.request.auth = auth;
        self
    }

    /// Mark the request as coming from a signed-in account.
    pub fn user(self, account_id: impl Into<String>) -> Self {
        self.auth(AuthState::authenticated(account_id))
    }

    /// Set the IP address.
    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.request.ip = Some(ip);
        self
    }

    /// Set the IP address from a string.
    pub fn ip_str(mut self, ip: &str) -> Result<Self, std::net::AddrParseError> {
        self.request.ip = Some(ip.parse()?);
        Ok(self)
    }

    /// Set the raw `X-Forwarded-For` value.
    pub fn forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.request.forwarded_for = Some(value.into());
        self
    }

    /// Build the rate limit request.
    pub fn build(self) -> RateLimitRequest {
        self.request
    }
}
