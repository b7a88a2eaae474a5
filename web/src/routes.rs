//! Router configuration.

use crate::handlers::{admin, finalize, health, reservations, tiers};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use softlock_core::Backend;
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// - `/health`, `/ready`: liveness and readiness
/// - `/api/reserve`, `/api/release`, `/api/holds/:session_id`: holds
/// - `/api/orders/:order_id`: order status
/// - `/api/finalize`: fulfillment
/// - `/api/tiers`: public listing
/// - `/api/admin/inventory`: capacity and tier configuration
pub fn build_router<B: Backend>(state: AppState<B>) -> Router {
    let api_routes = Router::new()
        .route("/reserve", post(reservations::reserve::<B>))
        .route("/release", post(reservations::release::<B>))
        .route("/holds/:session_id", get(reservations::list_holds::<B>))
        .route("/orders/:order_id", get(reservations::order::<B>))
        .route("/finalize", post(finalize::finalize::<B>))
        .route("/tiers", get(tiers::list_tiers::<B>))
        .route("/admin/inventory", post(admin::inventory::<B>));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check::<B>))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
