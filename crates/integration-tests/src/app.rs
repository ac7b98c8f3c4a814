//! A small application to put behind the rate limit layer.

use axum::{
    Router,
    routing::{get, post},
};

/// Routes under `/api/` plus one public page.
pub fn router() -> Router {
    Router::new()
        .route("/api/projects", get(|| async { "projects" }))
        .route("/api/health", get(|| async { "ok" }))
        .route("/api/auth/login", post(|| async { "welcome" }))
        .route("/api/upload/file", post(|| async { "stored" }))
        .route("/public", get(|| async { "public" }))
}
