//! HTTP server configuration settings.

use std::{borrow::Cow, net::SocketAddr};

use serde::Deserialize;

use crate::HealthConfig;

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Health endpoint configuration.
    #[serde(default)]
    pub health: HealthConfig,
    /// Forward-auth decision endpoint configuration.
    #[serde(default)]
    pub forward_auth: ForwardAuthConfig,
}

/// Decision endpoint queried by a reverse proxy before it forwards a request.
///
/// The proxy passes the original request URI, the client address chain and the
/// already-authenticated account id (if any) as headers.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForwardAuthConfig {
    /// Whether the endpoint is exposed.
    pub enabled: bool,
    /// Route of the endpoint.
    pub path: Cow<'static, str>,
    /// Header carrying the original request URI.
    pub uri_header: String,
    /// Header carrying the authenticated account id. Absent means anonymous.
    pub user_header: String,
}

impl Default for ForwardAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: Cow::Borrowed("/auth"),
            uri_header: "x-forwarded-uri".to_string(),
            user_header: "x-authenticated-user".to_string(),
        }
    }
}

/// Operator endpoints for inspecting and clearing counters.
///
/// These endpoints carry no authentication of their own and belong on an internal listener.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminConfig {
    /// Whether the admin endpoints are mounted.
    pub enabled: bool,
    /// Base path of the admin endpoints.
    pub path: Cow<'static, str>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: Cow::Borrowed("/admin/rate-limits"),
        }
    }
}
