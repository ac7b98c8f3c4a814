//! Turnstile server library.
//!
//! Serves the forward-auth decision endpoint, the operator endpoints and, optionally,
//! application routes wrapped in the rate limit layer. Used by the binary and by the
//! integration tests.

#![deny(missing_docs)]

mod admin;
mod annotate;
mod forward_auth;
mod health;
mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;

use ::rate_limit::RateLimitEvaluator;
use anyhow::anyhow;
use axum::{Router, routing::get};
use config::Config;
use http::HeaderName;
use tokio::net::TcpListener;

pub use self::rate_limit::{RateLimitLayer, RateLimitService};

/// Configuration for serving Turnstile.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Turnstile TOML configuration.
    pub config: Config,
    /// Application routes to serve behind the rate limit layer. Empty when running as a
    /// pure decision service.
    pub app: Router,
}

/// Starts and runs the Turnstile server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        app,
    }: ServeConfig,
) -> anyhow::Result<()> {
    let evaluator = RateLimitEvaluator::new(&config.rate_limits)
        .await
        .map_err(|e| anyhow!("Failed to initialize rate limiting: {e}"))?;

    let app = router(&config, Arc::new(evaluator), app)?;

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if config.server.forward_auth.enabled {
        log::info!(
            "Forward-auth endpoint available at: http://{listen_address}{}",
            config.server.forward_auth.path
        );
    }

    if config.admin.enabled {
        log::info!("Admin endpoints available at: http://{listen_address}{}", config.admin.path);
    }

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for the shutdown signal: {e}");
        std::future::pending::<()>().await;
    }

    log::info!("Shutdown signal received, draining connections");
}

/// Builds the full router around an existing evaluator.
pub fn router(config: &Config, evaluator: Arc<RateLimitEvaluator>, app: Router) -> anyhow::Result<Router> {
    let forward_auth = &config.server.forward_auth;

    let user_header = HeaderName::try_from(forward_auth.user_header.as_str())
        .map_err(|e| anyhow!("Invalid forward_auth.user_header '{}': {e}", forward_auth.user_header))?;

    let limiter = self::rate_limit::Limiter::new(evaluator.clone(), &config.rate_limits.protected_prefix, user_header);

    // Application routes are the only ones that get the layer.
    let mut router = if evaluator.is_enabled() {
        log::debug!("Applying HTTP rate limiting middleware to application routes");
        app.layer(RateLimitLayer::new(limiter.clone()))
    } else {
        log::debug!("Rate limiting disabled, application routes are served unrestricted");
        app
    };

    if forward_auth.enabled {
        router = router.merge(forward_auth::router(forward_auth, limiter)?);
    }

    if config.admin.enabled {
        router = router.merge(admin::router(&config.admin.path, evaluator));
    }

    if config.server.health.enabled {
        router = router.route(&config.server.health.path, get(health::health));
    }

    Ok(router)
}
