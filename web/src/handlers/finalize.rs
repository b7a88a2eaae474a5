//! Finalize endpoint: `POST /api/finalize`.
//!
//! Converts the caller's holds into tickets. Expired holds in the batch are
//! reported back rather than failing the request, unless none are left.

use super::json_body;
use crate::error::AppError;
use crate::extractors::ClientIp;
use crate::state::AppState;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use softlock_core::{Backend, Buyer, CheckoutId, OrderId, Scope, TicketId};

/// Request to finalize holds.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    /// Holds to convert
    pub checkout_ids: Vec<CheckoutId>,
    /// Buyer name
    pub buyer_name: String,
    /// Buyer email
    pub buyer_email: String,
    /// Buyer phone
    pub buyer_phone: String,
}

/// Response after finalize.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    /// Order of the first issued ticket
    pub order_id: OrderId,
    /// Tickets issued for the batch
    pub issued_ticket_ids: Vec<TicketId>,
    /// Checkout ids that were expired, unknown or closed
    pub skipped_checkout_ids: Vec<CheckoutId>,
}

/// Finalize a batch of holds.
///
/// # Errors
///
/// 410 when every hold had lapsed, 422 for invalid buyer details, 429 when
/// the client is over budget.
pub async fn finalize<B: Backend>(
    State(state): State<AppState<B>>,
    ClientIp(client): ClientIp,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> Result<Json<FinalizeResponse>, AppError> {
    let request = json_body(payload)?;
    state
        .engine
        .guard
        .check(Scope::Finalize, &client.to_string())
        .await?;

    let buyer = Buyer {
        name: request.buyer_name,
        email: request.buyer_email,
        phone: request.buyer_phone,
    };
    let outcome = state
        .engine
        .finalizer
        .finalize(&request.checkout_ids, &buyer)
        .await?;

    Ok(Json(FinalizeResponse {
        order_id: outcome.order_id,
        issued_ticket_ids: outcome.issued.iter().map(|t| t.id).collect(),
        skipped_checkout_ids: outcome.skipped,
    }))
}
