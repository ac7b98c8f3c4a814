//! Maps a request path to the policy categories that apply to it.

use config::{EndpointConfig, GENERAL_ANONYMOUS_CATEGORY, GENERAL_CATEGORY, RateLimitConfig, STRICT_ANONYMOUS_CATEGORY};

/// Resolves the ordered category list for a request.
///
/// Only paths under the protected prefix are limited, and exempt paths never are.
/// The order is: the most specific endpoint category, then `general`, then an anonymous
/// category for callers without an account.
#[derive(Debug, Clone)]
pub struct CategoryResolver {
    protected_prefix: String,
    exempt_paths: Vec<String>,
    sensitive_paths: Vec<String>,
    // Longest prefix first.
    endpoints: Vec<EndpointConfig>,
}

impl CategoryResolver {
    /// Creates a resolver from explicit path tables.
    pub fn new(
        protected_prefix: impl Into<String>,
        exempt_paths: Vec<String>,
        sensitive_paths: Vec<String>,
        mut endpoints: Vec<EndpointConfig>,
    ) -> Self {
        endpoints.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Self {
            protected_prefix: protected_prefix.into(),
            exempt_paths,
            sensitive_paths,
            endpoints,
        }
    }

    /// Creates a resolver from the rate limit configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.protected_prefix.clone(),
            config.exempt_paths.clone(),
            config.sensitive_paths.clone(),
            config.endpoints.clone(),
        )
    }

    /// Whether requests to this path bypass limiting entirely: outside the protected
    /// prefix, or under one of the exempt prefixes.
    pub fn is_exempt(&self, path: &str) -> bool {
        !path.starts_with(&self.protected_prefix)
            || self.exempt_paths.iter().any(|exempt| path.starts_with(exempt.as_str()))
    }

    /// The categories to check for a request, in evaluation order. Empty for exempt paths.
    pub fn resolve(&self, path: &str, is_authenticated: bool) -> Vec<String> {
        if self.is_exempt(path) {
            return Vec::new();
        }

        let mut categories: Vec<String> = Vec::with_capacity(3);

        if let Some(endpoint) = self.endpoints.iter().find(|endpoint| path.starts_with(&endpoint.prefix)) {
            categories.push(endpoint.category.clone());
        }

        if !categories.iter().any(|category| category == GENERAL_CATEGORY) {
            categories.push(GENERAL_CATEGORY.to_string());
        }

        if !is_authenticated {
            let sensitive = self.sensitive_paths.iter().any(|prefix| path.starts_with(prefix.as_str()));

            let anonymous = if sensitive {
                STRICT_ANONYMOUS_CATEGORY
            } else {
                GENERAL_ANONYMOUS_CATEGORY
            };

            if !categories.iter().any(|category| category == anonymous) {
                categories.push(anonymous.to_string());
            }
        }

        categories
    }
}
