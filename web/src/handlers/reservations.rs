//! Reservation endpoints.
//!
//! - `POST /api/reserve` - reserve several tiers or units as one request
//! - `POST /api/release` - give back one hold early
//! - `GET /api/holds/:session_id` - live holds of a session, for the countdown
//! - `GET /api/orders/:order_id` - order status; lines past their hold expiry
//!   read as lapsed

use super::json_body;
use crate::error::AppError;
use crate::extractors::ClientIp;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use softlock_core::{
    Backend, CheckoutId, Hold, LineItem, Money, Order, OrderId, OrderStatus, ReservationItem,
    Scope, SessionId, TierId,
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// One requested item.
#[derive(Debug, Deserialize)]
pub struct ReserveItem {
    /// Tier to reserve from
    pub tier: String,
    /// Unit number, numbered tiers only
    pub unit: Option<u32>,
    /// Quantity; ignored for unit items
    #[serde(default = "one")]
    pub quantity: u32,
}

const fn one() -> u32 {
    1
}

impl From<ReserveItem> for ReservationItem {
    fn from(item: ReserveItem) -> Self {
        match item.unit {
            Some(number) => Self::unit(TierId::new(item.tier), number),
            None => Self::tier(TierId::new(item.tier), item.quantity),
        }
    }
}

/// Request to reserve items.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    /// Items to reserve, all or nothing
    pub items: Vec<ReserveItem>,
    /// Anonymous buyer session
    pub session_id: String,
}

/// Response after a successful reservation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    /// Pending order
    pub order_id: OrderId,
    /// One checkout id per requested item, in request order
    pub checkout_ids: Vec<CheckoutId>,
    /// Earliest hold expiry
    pub expires_at: DateTime<Utc>,
}

/// Request to release a hold.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    /// Hold to release
    pub checkout_id: CheckoutId,
    /// Session that owns the hold
    pub session_id: String,
}

/// Response after a release.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    /// Always `true`; releasing an absent hold also succeeds
    pub ok: bool,
}

/// A live hold as shown to its session.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldView {
    /// Checkout id
    pub checkout_id: CheckoutId,
    /// Tier held
    pub tier: TierId,
    /// Unit number for numbered tiers
    pub unit_number: Option<u32>,
    /// Quantity held
    pub quantity: u32,
    /// When the hold was taken
    pub created_at: DateTime<Utc>,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
    /// Whole seconds left
    pub remaining_seconds: i64,
}

impl HoldView {
    fn new(hold: Hold, now: DateTime<Utc>) -> Self {
        Self {
            remaining_seconds: hold.remaining(now).num_seconds(),
            checkout_id: hold.checkout_id,
            tier: hold.target.tier().clone(),
            unit_number: hold.target.unit_number(),
            quantity: hold.target.quantity(),
            created_at: hold.created_at,
            expires_at: hold.expires_at,
        }
    }
}

/// An order as shown to the buyer. Buyer details are left out.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    /// Order id
    pub order_id: OrderId,
    /// Derived status
    pub status: OrderStatus,
    /// Amount due or paid
    pub amount: Money,
    /// One line per hold
    pub lines: Vec<LineItem>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            amount: order.amount,
            lines: order.lines,
            updated_at: order.updated_at,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Reserve items for a session.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/reserve \
///   -H "Content-Type: application/json" \
///   -d '{"sessionId": "s-1", "items": [{"tier": "gold", "quantity": 2}, {"tier": "lottery", "unit": 42}]}'
/// ```
///
/// # Errors
///
/// 409 when an item cannot be held (the message names it), 429 when the
/// client is over budget, 422 for malformed requests.
pub async fn reserve<B: Backend>(
    State(state): State<AppState<B>>,
    ClientIp(client): ClientIp,
    payload: Result<Json<ReserveRequest>, JsonRejection>,
) -> Result<Json<ReserveResponse>, AppError> {
    let request = json_body(payload)?;
    state
        .engine
        .guard
        .check(Scope::Reserve, &client.to_string())
        .await?;

    let items: Vec<ReservationItem> = request.items.into_iter().map(Into::into).collect();
    let reservation = state
        .engine
        .coordinator
        .reserve(&items, &SessionId::new(request.session_id), None)
        .await?;

    Ok(Json(ReserveResponse {
        order_id: reservation.order_id,
        checkout_ids: reservation.checkout_ids(),
        expires_at: reservation.expires_at,
    }))
}

/// Release one hold.
///
/// # Errors
///
/// 403 if the hold belongs to another session.
pub async fn release<B: Backend>(
    State(state): State<AppState<B>>,
    payload: Result<Json<ReleaseRequest>, JsonRejection>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let request = json_body(payload)?;
    state
        .engine
        .coordinator
        .release(request.checkout_id, &SessionId::new(request.session_id))
        .await?;

    Ok(Json(ReleaseResponse { ok: true }))
}

/// Live holds of a session, oldest first.
///
/// # Errors
///
/// 503 if the counter store is unreachable.
pub async fn list_holds<B: Backend>(
    State(state): State<AppState<B>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<HoldView>>, AppError> {
    let session_id = SessionId::new(session_id);
    session_id.validate()?;

    let holds = state.engine.holds.list_mine(&session_id).await?;
    let now = state.engine.holds.now();

    Ok(Json(
        holds
            .into_iter()
            .map(|hold| HoldView::new(hold, now))
            .collect(),
    ))
}

/// Current state of an order.
///
/// # Errors
///
/// 404 for an unknown order, 503 if the ledger is unreachable.
pub async fn order<B: Backend>(
    State(state): State<AppState<B>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<OrderView>, AppError> {
    let order = state
        .engine
        .coordinator
        .order(order_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Order {order_id} not found")))?;

    Ok(Json(order.into()))
}
