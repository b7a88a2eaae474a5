//! Admin Adjuster: capacity and tier configuration changes.
//!
//! The ledger owns `total` and `sold`; the counter store owns live
//! `available`. Every change here keeps
//! `available + held + sold = total` by ordering the two writes so that a
//! failure in between errs on the side of selling less, never more:
//!
//! - adding capacity writes the ledger first, then the counter
//! - removing capacity takes it out of the counter first, then the ledger,
//!   and puts it back in the counter if the ledger write fails

use crate::environment::Clock;
use crate::error::{AllocError, Result};
use crate::metrics;
use crate::providers::{CapacityRemoval, ClaimedHold, CounterStore, Ledger};
use crate::types::{
    AdjustOutcome, LineStatus, Tier, TierAvailability, TierConfigUpdate, TierDefinition, TierId,
};
use chrono::Duration;
use std::sync::Arc;

/// Claimed holds whose order line is still open are returned to the pool by
/// reconcile once this many seconds have passed since their expiry.
const STALE_CLAIM_GRACE_SECONDS: i64 = 60;

/// Admin operations over both stores.
pub struct AdminAdjuster<C, L> {
    store: Arc<C>,
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
}

impl<C: CounterStore, L: Ledger> AdminAdjuster<C, L> {
    /// Create an admin adjuster.
    #[must_use]
    pub fn new(store: Arc<C>, ledger: Arc<L>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            ledger,
            clock,
        }
    }

    /// Create a tier with zero capacity and seed its counter.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ValidationError`] for an invalid id or blank name
    /// - [`AllocError::AdminConflict`] if the tier exists
    /// - [`AllocError::StoreUnavailable`] if the ledger fails
    pub async fn define_tier(&self, definition: &TierDefinition) -> Result<Tier> {
        definition.id.validate()?;
        if definition.name.trim().is_empty() {
            return Err(AllocError::ValidationError("Tier name is required".into()));
        }

        let tier = self.ledger.define_tier(definition).await?;
        let (_, warning) = self.sync_counter(&tier).await;
        if let Some(warning) = warning {
            tracing::warn!(tier = %tier.id, warning = %warning, "Tier defined without counter");
        }

        tracing::info!(
            tier = %tier.id,
            kind = tier.kind.as_str(),
            price = %tier.price,
            "Tier defined"
        );
        Ok(tier)
    }

    /// Set a tier's total and recompute live availability from the ledger.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ValidationError`] if `total` is negative
    /// - [`AllocError::AdminConflict`] if `total` is below `sold`
    /// - [`AllocError::UnknownTier`] if the tier does not exist
    /// - [`AllocError::StoreUnavailable`] if the ledger fails
    pub async fn initialize(&self, tier: &TierId, total: i64) -> Result<AdjustOutcome> {
        if total < 0 {
            return Err(AllocError::ValidationError("Total cannot be negative".into()));
        }
        let total = u32::try_from(total)
            .map_err(|_| AllocError::ValidationError(format!("Total {total} is too large")))?;

        let updated = self.ledger.set_total(tier, total).await?;
        let (new_available, warning) = self.sync_counter(&updated).await;

        tracing::info!(
            tier = %tier,
            total,
            sold = updated.sold,
            available = new_available,
            "Tier capacity initialized"
        );
        metrics::record_admin_change("initialize", tier.as_str(), new_available);

        Ok(AdjustOutcome {
            tier: tier.clone(),
            new_available,
            new_total: updated.total,
            warning,
        })
    }

    /// Add capacity.
    ///
    /// If the counter store cannot be updated after the ledger was, the
    /// outcome carries a reconciliation warning and `new_available` reports
    /// the ledger's unsold count.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ValidationError`] if `quantity` is not positive
    /// - [`AllocError::UnknownTier`] if the tier does not exist
    /// - [`AllocError::StoreUnavailable`] if the ledger fails
    pub async fn add(&self, tier: &TierId, quantity: i64) -> Result<AdjustOutcome> {
        let quantity = Self::positive(quantity)?;
        let updated = self.ledger.adjust_total(tier, i64::from(quantity)).await?;

        let (new_available, warning) = match self
            .store
            .add_capacity(tier, quantity, self.clock.now())
            .await
        {
            Ok(Some(available)) => (available, None),
            Ok(None) => self.sync_counter(&updated).await,
            Err(e) => {
                tracing::warn!(
                    tier = %tier,
                    quantity,
                    error = %e,
                    "Capacity added to ledger but not to counter store"
                );
                (
                    updated.unsold(),
                    Some(format!(
                        "Ledger total updated but the counter store was not ({e}); run reconcile"
                    )),
                )
            }
        };

        tracing::info!(
            tier = %tier,
            quantity,
            total = updated.total,
            available = new_available,
            "Capacity added"
        );
        metrics::record_admin_change("add", tier.as_str(), new_available);

        Ok(AdjustOutcome {
            tier: tier.clone(),
            new_available,
            new_total: updated.total,
            warning,
        })
    }

    /// Remove capacity that is live-available right now.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ValidationError`] if `quantity` is not positive
    /// - [`AllocError::AdminConflict`] if `quantity` exceeds live availability
    ///   or would drop a held or sold numbered unit; nothing is changed
    /// - [`AllocError::UnknownTier`] if the tier has no counter
    /// - [`AllocError::StoreUnavailable`] if a store fails; the counter is
    ///   restored when the ledger write fails
    pub async fn remove(&self, tier: &TierId, quantity: i64) -> Result<AdjustOutcome> {
        let quantity = Self::positive(quantity)?;
        let now = self.clock.now();

        let new_available = match self.store.remove_capacity(tier, quantity, now).await? {
            CapacityRemoval::Removed { available } => available,
            CapacityRemoval::Insufficient { available } => {
                return Err(AllocError::AdminConflict {
                    tier: tier.clone(),
                    reason: format!(
                        "cannot remove {quantity}, only {available} currently available"
                    ),
                });
            }
            CapacityRemoval::UnitsInUse => {
                return Err(AllocError::AdminConflict {
                    tier: tier.clone(),
                    reason: format!("removing {quantity} would drop held or sold units"),
                });
            }
            CapacityRemoval::UnknownTier => return Err(AllocError::UnknownTier(tier.clone())),
        };

        let updated = match self.ledger.adjust_total(tier, -i64::from(quantity)).await {
            Ok(updated) => updated,
            Err(e) => {
                if let Err(restore) = self.store.add_capacity(tier, quantity, now).await {
                    tracing::error!(
                        tier = %tier,
                        quantity,
                        error = %restore,
                        "Failed to restore counter after ledger error, run reconcile"
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            tier = %tier,
            quantity,
            total = updated.total,
            available = new_available,
            "Capacity removed"
        );
        metrics::record_admin_change("remove", tier.as_str(), new_available);

        Ok(AdjustOutcome {
            tier: tier.clone(),
            new_available,
            new_total: updated.total,
            warning: None,
        })
    }

    /// Change name, price or description. Capacity is untouched.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ValidationError`] if nothing is changed or the name is blank
    /// - [`AllocError::UnknownTier`] if the tier does not exist
    /// - [`AllocError::StoreUnavailable`] if the ledger fails
    pub async fn update_tier_config(
        &self,
        tier: &TierId,
        update: &TierConfigUpdate,
    ) -> Result<Tier> {
        if update.is_empty() {
            return Err(AllocError::ValidationError("Nothing to update".into()));
        }
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AllocError::ValidationError("Tier name cannot be blank".into()));
        }

        let updated = self.ledger.update_tier_config(tier, update).await?;
        tracing::info!(
            tier = %tier,
            name = %updated.name,
            price = %updated.price,
            "Tier config updated"
        );
        metrics::record_config_update();
        Ok(updated)
    }

    /// Rebuild the tier's counter from the ledger.
    ///
    /// Claimed holds left behind by an interrupted finalize are settled when
    /// their line was fulfilled and returned to the pool otherwise. Open
    /// order lines whose hold expired are closed as lapsed, so their orders
    /// read as expired.
    ///
    /// # Errors
    ///
    /// - [`AllocError::UnknownTier`] if the tier does not exist
    /// - [`AllocError::StoreUnavailable`] if a store fails
    pub async fn reconcile(&self, tier: &TierId) -> Result<AdjustOutcome> {
        let current = self
            .ledger
            .tier(tier)
            .await?
            .ok_or_else(|| AllocError::UnknownTier(tier.clone()))?;

        self.resolve_stale_claims(tier).await?;
        let new_available = self
            .store
            .reconcile_tier(tier, current.total, current.unsold(), self.clock.now())
            .await?;

        tracing::info!(
            tier = %tier,
            total = current.total,
            sold = current.sold,
            available = new_available,
            "Tier reconciled"
        );
        metrics::record_admin_change("reconcile", tier.as_str(), new_available);

        Ok(AdjustOutcome {
            tier: tier.clone(),
            new_available,
            new_total: current.total,
            warning: None,
        })
    }

    /// Public listing with live availability.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::StoreUnavailable`] if a store fails.
    pub async fn list_tiers(&self) -> Result<Vec<TierAvailability>> {
        let now = self.clock.now();
        let tiers = self.ledger.list_tiers().await?;

        let mut listing = Vec::with_capacity(tiers.len());
        for tier in tiers {
            let available = match self.store.available(&tier.id, now).await? {
                Some(available) => available,
                None => {
                    tracing::warn!(tier = %tier.id, "Tier has no counter, listing as sold out");
                    0
                }
            };
            listing.push(TierAvailability {
                tier: tier.id,
                name: tier.name,
                price: tier.price,
                total: tier.total,
                available,
            });
        }
        Ok(listing)
    }

    /// Resolve stale claims, then recompute the counter. Failures become a
    /// warning rather than an error because the ledger write already happened.
    async fn sync_counter(&self, tier: &Tier) -> (u32, Option<String>) {
        let synced = async {
            self.resolve_stale_claims(&tier.id).await?;
            self.store
                .reconcile_tier(&tier.id, tier.total, tier.unsold(), self.clock.now())
                .await
        };

        match synced.await {
            Ok(available) => (available, None),
            Err(e) => {
                tracing::warn!(tier = %tier.id, error = %e, "Counter store not reconciled");
                (
                    tier.unsold(),
                    Some(format!(
                        "Ledger updated but the counter store was not ({e}); run reconcile"
                    )),
                )
            }
        }
    }

    /// Settle or return claims left behind by finalize calls that never
    /// finished, then close order lines whose hold expired.
    async fn resolve_stale_claims(&self, tier: &TierId) -> Result<()> {
        let now = self.clock.now();
        let grace = Duration::seconds(STALE_CLAIM_GRACE_SECONDS);

        for ClaimedHold { hold, token } in self.store.claimed_holds(tier).await? {
            let status = self
                .ledger
                .order_for_checkout(hold.checkout_id, now)
                .await?
                .and_then(|order| order.line(hold.checkout_id).map(|line| line.status));

            match status {
                Some(LineStatus::Fulfilled) => {
                    tracing::info!(checkout_id = %hold.checkout_id, "Settling fulfilled claim");
                    self.store.settle(&hold, token).await?;
                }
                Some(LineStatus::Open | LineStatus::Lapsed) if now <= hold.expires_at + grace => {}
                _ => {
                    tracing::info!(checkout_id = %hold.checkout_id, "Returning stale claim to pool");
                    self.store.unclaim(&hold, token).await?;
                }
            }
        }

        let lapsed = self.ledger.lapse_expired_lines(tier, now).await?;
        if lapsed > 0 {
            tracing::info!(tier = %tier, lapsed, "Closed order lines of expired holds");
        }
        Ok(())
    }

    fn positive(quantity: i64) -> Result<u32> {
        if quantity <= 0 {
            return Err(AllocError::ValidationError("Quantity must be positive".into()));
        }
        u32::try_from(quantity)
            .map_err(|_| AllocError::ValidationError(format!("Quantity {quantity} is too large")))
    }
}
