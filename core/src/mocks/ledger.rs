//! In-memory ledger for tests.

use crate::error::{AllocError, Result};
use crate::providers::{CommitOutcome, Fulfillment, Ledger};
use crate::types::{
    CheckoutId, LineStatus, Order, OrderId, Ticket, Tier, TierConfigUpdate, TierDefinition,
    TierId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct LedgerState {
    tiers: BTreeMap<TierId, Tier>,
    orders: HashMap<OrderId, Order>,
    lines: HashMap<CheckoutId, OrderId>,
    tickets: Vec<Ticket>,
}

impl LedgerState {
    fn tier_mut(&mut self, id: &TierId) -> Result<&mut Tier> {
        self.tiers
            .get_mut(id)
            .ok_or_else(|| AllocError::UnknownTier(id.clone()))
    }

    fn order_for_checkout_mut(&mut self, checkout_id: CheckoutId) -> Option<&mut Order> {
        let order_id = self.lines.get(&checkout_id)?;
        self.orders.get_mut(order_id)
    }
}

/// Ledger held in memory.
///
/// Each call is one critical section, standing in for a database
/// transaction. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreUnavailable` (or succeed
    /// again when `false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every ticket minted so far.
    #[must_use]
    pub fn all_tickets(&self) -> Vec<Ticket> {
        self.state
            .lock()
            .map(|s| s.tickets.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AllocError::StoreUnavailable("Ledger unavailable".into()));
        }
        self.state
            .lock()
            .map_err(|_| AllocError::StoreUnavailable("Mutex lock failed".into()))
    }
}

impl Ledger for InMemoryLedger {
    async fn list_tiers(&self) -> Result<Vec<Tier>> {
        Ok(self.lock()?.tiers.values().cloned().collect())
    }

    async fn tier(&self, id: &TierId) -> Result<Option<Tier>> {
        Ok(self.lock()?.tiers.get(id).cloned())
    }

    async fn define_tier(&self, definition: &TierDefinition) -> Result<Tier> {
        let mut state = self.lock()?;
        if state.tiers.contains_key(&definition.id) {
            return Err(AllocError::AdminConflict {
                tier: definition.id.clone(),
                reason: "tier already exists".into(),
            });
        }
        let tier = Tier {
            id: definition.id.clone(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            price: definition.price,
            kind: definition.kind,
            total: 0,
            sold: 0,
        };
        state.tiers.insert(tier.id.clone(), tier.clone());
        Ok(tier)
    }

    async fn set_total(&self, id: &TierId, total: u32) -> Result<Tier> {
        let mut state = self.lock()?;
        let tier = state.tier_mut(id)?;
        if total < tier.sold {
            return Err(AllocError::AdminConflict {
                tier: id.clone(),
                reason: format!("total {total} is below sold {}", tier.sold),
            });
        }
        tier.total = total;
        Ok(tier.clone())
    }

    async fn adjust_total(&self, id: &TierId, delta: i64) -> Result<Tier> {
        let mut state = self.lock()?;
        let tier = state.tier_mut(id)?;
        let new_total = i64::from(tier.total) + delta;
        let Ok(new_total) = u32::try_from(new_total) else {
            return Err(AllocError::AdminConflict {
                tier: id.clone(),
                reason: format!("total would become {new_total}"),
            });
        };
        if new_total < tier.sold {
            return Err(AllocError::AdminConflict {
                tier: id.clone(),
                reason: format!("total {new_total} is below sold {}", tier.sold),
            });
        }
        tier.total = new_total;
        Ok(tier.clone())
    }

    async fn update_tier_config(&self, id: &TierId, update: &TierConfigUpdate) -> Result<Tier> {
        let mut state = self.lock()?;
        let tier = state.tier_mut(id)?;
        if let Some(name) = &update.name {
            tier.name.clone_from(name);
        }
        if let Some(price) = update.price {
            tier.price = price;
        }
        if let Some(description) = &update.description {
            tier.description = Some(description.clone());
        }
        Ok(tier.clone())
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut state = self.lock()?;
        for line in &order.lines {
            state.lines.insert(line.checkout_id, order.id);
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn order(&self, id: OrderId, now: DateTime<Utc>) -> Result<Option<Order>> {
        let mut state = self.lock()?;
        Ok(state.orders.get_mut(&id).map(|order| {
            order.lapse_expired(now);
            order.clone()
        }))
    }

    async fn order_for_checkout(
        &self,
        checkout_id: CheckoutId,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let mut state = self.lock()?;
        Ok(state.order_for_checkout_mut(checkout_id).map(|order| {
            order.lapse_expired(now);
            order.clone()
        }))
    }

    async fn lapse_expired_lines(&self, tier: &TierId, now: DateTime<Utc>) -> Result<u32> {
        let mut state = self.lock()?;
        let mut lapsed = 0;
        for order in state.orders.values_mut() {
            let expired = order
                .lines
                .iter()
                .filter(|l| l.tier == *tier && l.is_lapsed(now))
                .count();
            if expired == 0 {
                continue;
            }
            for line in &mut order.lines {
                if line.tier == *tier && line.is_lapsed(now) {
                    line.status = LineStatus::Lapsed;
                }
            }
            order.updated_at = now;
            order.refresh();
            lapsed += u32::try_from(expired).unwrap_or(u32::MAX);
        }
        Ok(lapsed)
    }

    async fn close_line(
        &self,
        checkout_id: CheckoutId,
        status: LineStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let mut state = self.lock()?;
        let Some(order) = state.order_for_checkout_mut(checkout_id) else {
            return Ok(None);
        };
        if let Some(line) = order.line_mut(checkout_id) {
            if line.status == LineStatus::Open {
                line.status = status;
                order.updated_at = at;
                order.refresh();
            }
        }
        Ok(Some(order.clone()))
    }

    async fn commit_fulfillment(&self, fulfillment: &Fulfillment) -> Result<CommitOutcome> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let Some(order) = state
            .lines
            .get(&fulfillment.checkout_id)
            .and_then(|id| state.orders.get_mut(id))
        else {
            return Ok(CommitOutcome::MissingLine);
        };
        let Some(line) = order.line_mut(fulfillment.checkout_id) else {
            return Ok(CommitOutcome::MissingLine);
        };

        match line.status {
            LineStatus::Open | LineStatus::Lapsed => {}
            LineStatus::Fulfilled => {
                let tickets = state
                    .tickets
                    .iter()
                    .filter(|t| t.checkout_id == fulfillment.checkout_id)
                    .cloned()
                    .collect();
                return Ok(CommitOutcome::AlreadyFulfilled(tickets));
            }
            closed => return Ok(CommitOutcome::LineClosed(closed)),
        }

        let Some(tier) = state.tiers.get_mut(&line.tier) else {
            return Ok(CommitOutcome::SoldOut);
        };
        if tier.sold.saturating_add(line.quantity) > tier.total {
            return Ok(CommitOutcome::SoldOut);
        }
        tier.sold += line.quantity;

        line.status = LineStatus::Fulfilled;
        order.buyer = Some(fulfillment.buyer.clone());
        order.updated_at = fulfillment.at;
        order.paid_at.get_or_insert(fulfillment.at);
        order.refresh();
        state.tickets.extend(fulfillment.tickets.iter().cloned());

        Ok(CommitOutcome::Committed(order.clone()))
    }

    async fn tickets_for_checkout(&self, checkout_id: CheckoutId) -> Result<Vec<Ticket>> {
        Ok(self
            .lock()?
            .tickets
            .iter()
            .filter(|t| t.checkout_id == checkout_id)
            .cloned()
            .collect())
    }
}
