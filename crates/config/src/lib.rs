//! Turnstile configuration structures to map the turnstile.toml configuration.

#![deny(missing_docs)]

mod health;
mod loader;
mod rate_limit;
mod server;

use std::path::Path;

pub use health::HealthConfig;
pub use rate_limit::*;
use serde::Deserialize;
pub use server::{AdminConfig, ForwardAuthConfig, ServerConfig};

/// Main configuration structure for the Turnstile application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Operator endpoints.
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates the configuration, failing on misconfigured policies and returning
    /// non-fatal warnings.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        loader::validate(self)
    }
}
