//! Public tier listing: `GET /api/tiers`.

use crate::error::AppError;
use crate::state::AppState;
use axum::{Json, extract::State};
use softlock_core::{Backend, TierAvailability};

/// All tiers with live availability.
///
/// # Errors
///
/// 503 if either store is unreachable.
pub async fn list_tiers<B: Backend>(
    State(state): State<AppState<B>>,
) -> Result<Json<Vec<TierAvailability>>, AppError> {
    Ok(Json(state.engine.admin.list_tiers().await?))
}
