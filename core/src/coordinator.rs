//! Reservation Coordinator: multi-item reservations as a saga.
//!
//! Items are acquired one by one through the [`HoldManager`]. The first
//! failure releases every hold acquired so far (the compensating steps) and
//! surfaces a single [`AllocError::ReservationFailed`] naming the item. Once
//! all holds are in place a pending [`Order`] is written to the ledger with
//! one line per hold.
//!
//! A numbered unit the session already holds is reused rather than refused.
//! If its hold already backs an order line, that line stays where it is; a
//! request made only of such units returns the existing order unchanged.

use crate::environment::Clock;
use crate::error::{AllocError, Result};
use crate::hold::{HoldManager, UnitHold};
use crate::metrics;
use crate::providers::{CounterStore, Ledger};
use crate::types::{
    CheckoutId, Hold, LineItem, LineStatus, Order, OrderId, Reservation, ReservationItem,
    SessionId, Tier, TierId, TierKind, UnitId,
};
use chrono::Duration;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Request limits applied before anything is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationLimits {
    /// Default hold lifetime
    pub hold_ttl: Duration,
    /// Maximum number of items in one request
    pub max_items: usize,
    /// Maximum quantity of a single item
    pub max_quantity: u32,
}

impl Default for ReservationLimits {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::minutes(5),
            max_items: 10,
            max_quantity: 10,
        }
    }
}

/// A hold taken for one item of a request.
struct Acquired {
    hold: Hold,
    /// Taken by this call, as opposed to reused from the session
    fresh: bool,
}

/// Coordinates multi-item reservations and their release.
pub struct ReservationCoordinator<C, L> {
    holds: HoldManager<C>,
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
    limits: ReservationLimits,
}

impl<C: CounterStore, L: Ledger> ReservationCoordinator<C, L> {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        holds: HoldManager<C>,
        ledger: Arc<L>,
        clock: Arc<dyn Clock>,
        limits: ReservationLimits,
    ) -> Self {
        Self {
            holds,
            ledger,
            clock,
            limits,
        }
    }

    /// Limits in force.
    #[must_use]
    pub const fn limits(&self) -> &ReservationLimits {
        &self.limits
    }

    /// Reserve every item or none of them.
    ///
    /// `ttl` overrides the configured hold lifetime. Units the session
    /// already holds are reused with their own expiry, so resubmitting a
    /// reserved basket returns the order it already has.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ValidationError`] for a malformed request (nothing acquired)
    /// - [`AllocError::ReservationFailed`] naming the first item that could not
    ///   be reserved; all holds taken by this call have been released
    /// - [`AllocError::StoreUnavailable`] if the order could not be written;
    ///   all holds taken by this call have been released
    pub async fn reserve(
        &self,
        items: &[ReservationItem],
        session_id: &SessionId,
        ttl: Option<Duration>,
    ) -> Result<Reservation> {
        session_id.validate()?;
        self.validate_items(items)?;
        let ttl = ttl.unwrap_or(self.limits.hold_ttl);

        let tiers = self.load_tiers(items).await?;

        let mut acquired: Vec<Acquired> = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match self.acquire_item(item, session_id, ttl).await {
                Ok(hold) => acquired.push(hold),
                Err(source) => {
                    tracing::info!(
                        session_id = %session_id,
                        index,
                        tier = %item.tier,
                        error = %source,
                        rolled_back = acquired.iter().filter(|a| a.fresh).count(),
                        "Reservation failed, releasing acquired holds"
                    );
                    self.compensate(&acquired, session_id).await;
                    metrics::record_reservation("rolled_back");
                    return Err(AllocError::ReservationFailed {
                        index,
                        source: Box::new(source),
                    });
                }
            }
        }

        let now = self.clock.now();
        let mut existing_order: Option<OrderId> = None;
        let mut lines = Vec::with_capacity(acquired.len());
        for Acquired { hold, fresh } in &acquired {
            if !fresh {
                let known = match self.ledger.order_for_checkout(hold.checkout_id, now).await {
                    Ok(order) => order.map(|o| o.id),
                    Err(e) => {
                        self.compensate(&acquired, session_id).await;
                        metrics::record_reservation("rolled_back");
                        return Err(e);
                    }
                };
                if let Some(order_id) = known {
                    existing_order.get_or_insert(order_id);
                    continue;
                }
            }

            let tier = hold.target.tier();
            lines.push(LineItem {
                checkout_id: hold.checkout_id,
                tier: tier.clone(),
                unit_number: hold.target.unit_number(),
                quantity: hold.target.quantity(),
                unit_price: tiers.get(tier).map(|t| t.price).unwrap_or_default(),
                status: LineStatus::Open,
                expires_at: hold.expires_at,
            });
        }

        let expires_at = acquired
            .iter()
            .map(|a| a.hold.expires_at)
            .min()
            .unwrap_or_else(|| now + ttl);

        let order_id = match existing_order {
            Some(order_id) if lines.is_empty() => {
                tracing::info!(
                    order_id = %order_id,
                    session_id = %session_id,
                    holds = acquired.len(),
                    "Reservation already recorded"
                );
                order_id
            }
            _ => {
                let order = Order::pending(session_id.clone(), lines, now);
                if let Err(e) = self.ledger.create_order(&order).await {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "Could not record pending order, releasing holds"
                    );
                    self.compensate(&acquired, session_id).await;
                    metrics::record_reservation("rolled_back");
                    return Err(e);
                }

                tracing::info!(
                    order_id = %order.id,
                    session_id = %session_id,
                    holds = acquired.len(),
                    amount = %order.amount,
                    expires_at = %expires_at,
                    "Reservation created"
                );
                metrics::record_reservation("created");
                order.id
            }
        };

        Ok(Reservation {
            order_id,
            holds: acquired.into_iter().map(|a| a.hold).collect(),
            expires_at,
        })
    }

    /// Read an order. Lines whose hold expired before now read as lapsed.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::StoreUnavailable`] if the ledger fails.
    pub async fn order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.ledger.order(order_id, self.clock.now()).await
    }

    /// Release one hold of a reservation and close its order line.
    ///
    /// Releasing an absent or expired hold is a successful no-op.
    ///
    /// # Errors
    ///
    /// - [`AllocError::HoldNotOwned`] if another session owns the hold
    /// - [`AllocError::StoreUnavailable`] if a store fails
    pub async fn release(&self, checkout_id: CheckoutId, session_id: &SessionId) -> Result<()> {
        if self.holds.release(checkout_id, session_id).await?.is_some() {
            let order = self
                .ledger
                .close_line(checkout_id, LineStatus::Released, self.clock.now())
                .await?;
            if let Some(order) = order {
                tracing::debug!(
                    order_id = %order.id,
                    status = order.status.as_str(),
                    "Closed released order line"
                );
            }
        }
        Ok(())
    }

    /// The hold manager used by this coordinator.
    #[must_use]
    pub const fn holds(&self) -> &HoldManager<C> {
        &self.holds
    }

    fn validate_items(&self, items: &[ReservationItem]) -> Result<()> {
        if items.is_empty() {
            return Err(AllocError::ValidationError("No items requested".into()));
        }
        if items.len() > self.limits.max_items {
            return Err(AllocError::ValidationError(format!(
                "At most {} items per request",
                self.limits.max_items
            )));
        }

        let mut units = HashSet::new();
        for (index, item) in items.iter().enumerate() {
            let fail = |msg: String| AllocError::ReservationFailed {
                index,
                source: Box::new(AllocError::ValidationError(msg)),
            };

            item.tier.validate().map_err(|e| AllocError::ReservationFailed {
                index,
                source: Box::new(e),
            })?;
            if item.quantity == 0 || item.quantity > self.limits.max_quantity {
                return Err(fail(format!(
                    "Quantity must be between 1 and {}",
                    self.limits.max_quantity
                )));
            }
            if let Some(number) = item.unit {
                if item.quantity != 1 {
                    return Err(fail("A numbered unit has quantity 1".into()));
                }
                if !units.insert((item.tier.clone(), number)) {
                    let unit = UnitId::new(item.tier.clone(), number);
                    return Err(fail(format!("Unit {unit} requested twice")));
                }
            }
        }
        Ok(())
    }

    async fn load_tiers(&self, items: &[ReservationItem]) -> Result<HashMap<TierId, Tier>> {
        let mut tiers: HashMap<TierId, Tier> = HashMap::new();
        for (index, item) in items.iter().enumerate() {
            if !tiers.contains_key(&item.tier) {
                let Some(tier) = self.ledger.tier(&item.tier).await? else {
                    return Err(AllocError::ReservationFailed {
                        index,
                        source: Box::new(AllocError::UnknownTier(item.tier.clone())),
                    });
                };
                tiers.insert(item.tier.clone(), tier);
            }

            let kind = tiers.get(&item.tier).map(|t| t.kind);
            let mismatch = match (kind, item.unit) {
                (Some(TierKind::Numbered), None) => Some("is numbered; pick a unit"),
                (Some(TierKind::Counted), Some(_)) => Some("has no numbered units"),
                _ => None,
            };
            if let Some(reason) = mismatch {
                return Err(AllocError::ReservationFailed {
                    index,
                    source: Box::new(AllocError::ValidationError(format!(
                        "Tier {} {reason}",
                        item.tier
                    ))),
                });
            }
        }
        Ok(tiers)
    }

    async fn acquire_item(
        &self,
        item: &ReservationItem,
        session_id: &SessionId,
        ttl: Duration,
    ) -> Result<Acquired> {
        match item.unit {
            None => {
                let hold = self
                    .holds
                    .acquire_tier(&item.tier, item.quantity, session_id, ttl)
                    .await?;
                Ok(Acquired { hold, fresh: true })
            }
            Some(number) => {
                let unit = UnitId::new(item.tier.clone(), number);
                Ok(
                    match self.holds.acquire_unit_tracked(&unit, session_id, ttl).await? {
                        UnitHold::Fresh(hold) => Acquired { hold, fresh: true },
                        UnitHold::Existing(hold) => Acquired { hold, fresh: false },
                    },
                )
            }
        }
    }

    /// Release the holds this call took, in reverse acquisition order.
    /// Failures are logged; the holds then lapse at their expiry.
    async fn compensate(&self, acquired: &[Acquired], session_id: &SessionId) {
        for Acquired { hold, .. } in acquired.iter().rev().filter(|a| a.fresh) {
            if let Err(e) = self.holds.release(hold.checkout_id, session_id).await {
                tracing::warn!(
                    checkout_id = %hold.checkout_id,
                    error = %e,
                    expires_at = %hold.expires_at,
                    "Compensating release failed, hold will lapse at expiry"
                );
            }
        }
    }
}
