//! Operator endpoints for inspecting and clearing rate limit windows.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
};
use http::StatusCode;
use rate_limit::{Identifier, RateLimitError, RateLimitEvaluator, UsageSnapshot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct StatusResponse {
    identifier: String,
    limits: Vec<UsageSnapshot>,
}

#[derive(Debug, Serialize)]
struct ResetResponse {
    deleted: usize,
}

#[derive(Debug, Deserialize)]
struct ResetQuery {
    category: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

struct AdminError(RateLimitError);

impl From<RateLimitError> for AdminError {
    fn from(error: RateLimitError) -> Self {
        Self(error)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            RateLimitError::InvalidIdentifier(_) => (StatusCode::BAD_REQUEST, "invalid_identifier"),
            RateLimitError::PolicyNotFound(_) => (StatusCode::NOT_FOUND, "unknown_category"),
            RateLimitError::MisconfiguredPolicy { .. } => (StatusCode::BAD_REQUEST, "misconfigured_policy"),
            RateLimitError::Storage(_) => {
                log::error!("Admin request failed: {}", self.0);
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
        };

        let body = ErrorBody {
            error,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

pub(crate) fn router(path: &str, evaluator: Arc<RateLimitEvaluator>) -> Router {
    let route = format!("{}/{{identifier}}", path.trim_end_matches('/'));

    Router::new()
        .route(&route, get(status).delete(reset))
        .with_state(evaluator)
}

async fn status(
    State(evaluator): State<Arc<RateLimitEvaluator>>,
    Path(identifier): Path<String>,
) -> Result<Json<StatusResponse>, AdminError> {
    let identifier: Identifier = identifier.parse()?;
    let limits = evaluator.admin().status(&identifier).await?;

    Ok(Json(StatusResponse {
        identifier: identifier.to_string(),
        limits,
    }))
}

async fn reset(
    State(evaluator): State<Arc<RateLimitEvaluator>>,
    Path(identifier): Path<String>,
    Query(query): Query<ResetQuery>,
) -> Result<Json<ResetResponse>, AdminError> {
    let identifier: Identifier = identifier.parse()?;

    let deleted = evaluator
        .admin()
        .reset(&identifier, query.category.as_deref())
        .await?;

    Ok(Json(ResetResponse { deleted }))
}
