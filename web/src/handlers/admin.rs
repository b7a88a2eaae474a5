//! Admin inventory endpoint: `POST /api/admin/inventory`.
//!
//! One route, dispatched on `action`:
//!
//! | action       | uses                                   |
//! |--------------|----------------------------------------|
//! | `define`     | `tier`, `name`, `price`, `kind`, `description?` |
//! | `initialize` | `tier`, `quantity` (new total)         |
//! | `add`        | `tier`, `quantity`                     |
//! | `remove`     | `tier`, `quantity`                     |
//! | `update`     | `tier`, `name?`, `price?`, `description?` |
//! | `reconcile`  | `tier`                                 |
//!
//! Authentication of operators happens in front of this service.

use super::json_body;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use softlock_core::{
    AdjustOutcome, Backend, Money, Tier, TierConfigUpdate, TierDefinition, TierId, TierKind,
};

/// Admin operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminAction {
    /// Create a tier with zero capacity
    Define,
    /// Set the total
    Initialize,
    /// Add capacity
    Add,
    /// Remove live-available capacity
    Remove,
    /// Change name, price or description
    Update,
    /// Rebuild the counter from the ledger
    Reconcile,
}

/// Admin request body.
#[derive(Debug, Deserialize)]
pub struct AdminRequest {
    /// Operation to run
    pub action: AdminAction,
    /// Target tier
    pub tier: String,
    /// Quantity, or the new total for `initialize`
    pub quantity: Option<i64>,
    /// Display name
    pub name: Option<String>,
    /// Price in minor units
    pub price: Option<u64>,
    /// Description
    pub description: Option<String>,
    /// `counted` or `numbered`, for `define`
    pub kind: Option<TierKind>,
}

/// Admin response body.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminResponse {
    /// Live availability after the change
    pub new_available: u32,
    /// Ledger total after the change
    pub new_total: u32,
    /// Set when the counter store needs a reconcile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<AdjustOutcome> for AdminResponse {
    fn from(outcome: AdjustOutcome) -> Self {
        Self {
            new_available: outcome.new_available,
            new_total: outcome.new_total,
            warning: outcome.warning,
        }
    }
}

/// Run an admin operation.
///
/// # Errors
///
/// 409 for capacity conflicts, 404 for unknown tiers, 422 for missing or
/// invalid fields.
pub async fn inventory<B: Backend>(
    State(state): State<AppState<B>>,
    payload: Result<Json<AdminRequest>, JsonRejection>,
) -> Result<Json<AdminResponse>, AppError> {
    let request = json_body(payload)?;
    let admin = &state.engine.admin;
    let tier = TierId::new(request.tier.clone());

    let outcome = match request.action {
        AdminAction::Initialize => admin.initialize(&tier, quantity(&request)?).await?,
        AdminAction::Add => admin.add(&tier, quantity(&request)?).await?,
        AdminAction::Remove => admin.remove(&tier, quantity(&request)?).await?,
        AdminAction::Reconcile => admin.reconcile(&tier).await?,
        AdminAction::Define => {
            let definition = TierDefinition {
                id: tier,
                name: request
                    .name
                    .ok_or_else(|| AppError::validation("name is required for define"))?,
                description: request.description,
                price: Money::from_minor(
                    request
                        .price
                        .ok_or_else(|| AppError::validation("price is required for define"))?,
                ),
                kind: request.kind.unwrap_or(TierKind::Counted),
            };
            let defined = admin.define_tier(&definition).await?;
            return Ok(Json(listed(&state, defined).await?));
        }
        AdminAction::Update => {
            let update = TierConfigUpdate {
                name: request.name,
                price: request.price.map(Money::from_minor),
                description: request.description,
            };
            let updated = admin.update_tier_config(&tier, &update).await?;
            return Ok(Json(listed(&state, updated).await?));
        }
    };

    Ok(Json(outcome.into()))
}

fn quantity(request: &AdminRequest) -> Result<i64, AppError> {
    request
        .quantity
        .ok_or_else(|| AppError::validation("quantity is required"))
}

/// Response for operations that leave capacity untouched.
async fn listed<B: Backend>(state: &AppState<B>, tier: Tier) -> Result<AdminResponse, AppError> {
    let available = state
        .engine
        .admin
        .list_tiers()
        .await?
        .into_iter()
        .find(|listing| listing.tier == tier.id)
        .map_or(0, |listing| listing.available);

    Ok(AdminResponse {
        new_available: available,
        new_total: tier.total,
        warning: None,
    })
}
