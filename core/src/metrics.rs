//! Engine metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `softlock_holds_total{kind,result}` - Hold attempts by target kind and outcome
//! - `softlock_releases_total` - Holds released by their session
//! - `softlock_reservations_total{result}` - Multi-item reservations by outcome
//! - `softlock_tickets_issued_total` - Tickets minted by the finalizer
//! - `softlock_finalize_skipped_total` - Checkout ids skipped during finalize
//! - `softlock_rate_limited_total{scope}` - Requests rejected by the rate limiter
//! - `softlock_admin_changes_total{action}` - Admin capacity and config changes
//!
//! ## Gauges
//! - `softlock_tier_available{tier}` - Live availability observed by admin calls

use metrics::{describe_counter, describe_gauge};

/// Register metric descriptions.
///
/// Call once at startup, before any metric is recorded.
pub fn register_engine_metrics() {
    describe_counter!(
        "softlock_holds_total",
        "Hold attempts by kind (tier, unit) and result (acquired, insufficient, locked)"
    );
    describe_counter!("softlock_releases_total", "Holds released by their session");
    describe_counter!(
        "softlock_reservations_total",
        "Reservations by result (created, rolled_back)"
    );
    describe_counter!(
        "softlock_tickets_issued_total",
        "Tickets minted by the finalizer"
    );
    describe_counter!(
        "softlock_finalize_skipped_total",
        "Checkout ids skipped during finalize (expired, released, missing)"
    );
    describe_counter!(
        "softlock_rate_limited_total",
        "Requests rejected by the rate limiter, by scope"
    );
    describe_counter!(
        "softlock_admin_changes_total",
        "Admin inventory changes by action"
    );
    describe_gauge!(
        "softlock_tier_available",
        "Live availability per tier as last observed by an admin call"
    );

    tracing::info!("Engine metrics registered");
}

pub(crate) fn record_hold(kind: &'static str, result: &'static str) {
    metrics::counter!("softlock_holds_total", "kind" => kind, "result" => result).increment(1);
}

pub(crate) fn record_release() {
    metrics::counter!("softlock_releases_total").increment(1);
}

pub(crate) fn record_reservation(result: &'static str) {
    metrics::counter!("softlock_reservations_total", "result" => result).increment(1);
}

pub(crate) fn record_tickets_issued(count: usize) {
    metrics::counter!("softlock_tickets_issued_total").increment(count as u64);
}

pub(crate) fn record_finalize_skipped(count: usize) {
    if count > 0 {
        metrics::counter!("softlock_finalize_skipped_total").increment(count as u64);
    }
}

pub(crate) fn record_rate_limited(scope: &'static str) {
    metrics::counter!("softlock_rate_limited_total", "scope" => scope).increment(1);
}

pub(crate) fn record_admin_change(action: &'static str, tier: &str, available: u32) {
    metrics::counter!("softlock_admin_changes_total", "action" => action).increment(1);
    metrics::gauge!("softlock_tier_available", "tier" => tier.to_string())
        .set(f64::from(available));
}

pub(crate) fn record_config_update() {
    metrics::counter!("softlock_admin_changes_total", "action" => "update_config").increment(1);
}
