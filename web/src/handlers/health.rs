//! Health check endpoints.
//!
//! Used by load balancers and monitoring systems.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use softlock_core::Backend;

/// Health response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, `ready` or `unavailable`
    pub status: String,
}

impl HealthResponse {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

/// Liveness: the process is up. Does not touch the stores.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::new("ok"))
}

/// Readiness: both stores answer.
///
/// ```text
/// GET /ready
/// ```
///
/// Returns 503 Service Unavailable when the ledger or the counter store
/// cannot be reached.
pub async fn readiness_check<B: Backend>(
    State(state): State<AppState<B>>,
) -> (StatusCode, Json<HealthResponse>) {
    match state.engine.admin.list_tiers().await {
        Ok(_) => (StatusCode::OK, Json(HealthResponse::new("ready"))),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::new("unavailable")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let Json(body) = health_check().await;
        assert_eq!(body.status, "ok");
    }
}
