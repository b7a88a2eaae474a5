//! In-memory counter store for tests.

use crate::error::{AllocError, Result};
use crate::providers::{
    CapacityRemoval, ClaimOutcome, ClaimedHold, CounterStore, ReleaseOutcome, TierAcquire,
    UnitAcquire,
};
use crate::types::{CheckoutId, ClaimToken, Hold, SessionId, TierId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitSlot {
    Held(CheckoutId),
    Sold,
}

#[derive(Debug, Default)]
struct TierCounter {
    capacity: u32,
    available: u32,
    units: HashMap<u32, UnitSlot>,
}

#[derive(Debug)]
struct HoldEntry {
    hold: Hold,
    claim: Option<ClaimToken>,
}

impl HoldEntry {
    fn claimed(&self) -> bool {
        self.claim.is_some()
    }
}

#[derive(Debug, Default)]
struct CounterState {
    tiers: HashMap<TierId, TierCounter>,
    holds: HashMap<CheckoutId, HoldEntry>,
}

impl CounterState {
    /// Return the capacity of every unclaimed hold that lapsed before `now`.
    fn reclaim(&mut self, now: DateTime<Utc>) {
        let lapsed: Vec<CheckoutId> = self
            .holds
            .values()
            .filter(|e| !e.claimed() && e.hold.is_expired(now))
            .map(|e| e.hold.checkout_id)
            .collect();

        for checkout_id in lapsed {
            if let Some(entry) = self.holds.remove(&checkout_id) {
                tracing::debug!(checkout_id = %checkout_id, "Reclaimed lapsed hold");
                self.give_back(&entry.hold);
            }
        }
    }

    fn give_back(&mut self, hold: &Hold) {
        if let Some(counter) = self.tiers.get_mut(hold.target.tier()) {
            counter.available = counter.available.saturating_add(hold.target.quantity());
            if let Some(number) = hold.target.unit_number() {
                if counter.units.get(&number) == Some(&UnitSlot::Held(hold.checkout_id)) {
                    counter.units.remove(&number);
                }
            }
        }
    }

    fn claimed_by(&self, checkout_id: CheckoutId, token: ClaimToken) -> bool {
        self.holds
            .get(&checkout_id)
            .is_some_and(|e| e.claim == Some(token))
    }

    fn held_quantity(&self, tier: &TierId) -> u32 {
        self.holds
            .values()
            .filter(|e| e.hold.target.tier() == tier)
            .map(|e| e.hold.target.quantity())
            .sum()
    }
}

/// Counter store backed by a single mutex.
///
/// Each trait method runs inside one critical section, which gives the same
/// all-or-nothing behaviour as the Lua scripts of the Redis store. Clones
/// share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCounterStore {
    state: Arc<Mutex<CounterState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCounterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreUnavailable` (or succeed
    /// again when `false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Raw `available` counter without reclaiming lapsed holds.
    #[must_use]
    pub fn raw_available(&self, tier: &TierId) -> Option<u32> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tiers.get(tier).map(|c| c.available))
    }

    /// Number of hold records still stored, claimed ones included.
    #[must_use]
    pub fn stored_holds(&self) -> usize {
        self.state.lock().map(|s| s.holds.len()).unwrap_or_default()
    }

    /// Quantity held on `tier` by stored holds, claimed ones included.
    ///
    /// Lapsed holds count until a primitive touching the store reclaims them.
    #[must_use]
    pub fn held(&self, tier: &TierId) -> u32 {
        self.state
            .lock()
            .map(|s| s.held_quantity(tier))
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, CounterState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AllocError::StoreUnavailable(
                "Counter store unavailable".into(),
            ));
        }
        self.state
            .lock()
            .map_err(|_| AllocError::StoreUnavailable("Mutex lock failed".into()))
    }
}

impl CounterStore for InMemoryCounterStore {
    async fn reconcile_tier(
        &self,
        tier: &TierId,
        capacity: u32,
        unsold: u32,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let mut state = self.lock()?;
        state.reclaim(now);
        let held = state.held_quantity(tier);
        let counter = state.tiers.entry(tier.clone()).or_default();
        counter.capacity = capacity;
        counter.available = unsold.saturating_sub(held);
        Ok(counter.available)
    }

    async fn available(&self, tier: &TierId, now: DateTime<Utc>) -> Result<Option<u32>> {
        let mut state = self.lock()?;
        state.reclaim(now);
        Ok(state.tiers.get(tier).map(|c| c.available))
    }

    async fn acquire_tier(&self, hold: &Hold) -> Result<TierAcquire> {
        let mut state = self.lock()?;
        state.reclaim(hold.created_at);

        let quantity = hold.target.quantity();
        let Some(counter) = state.tiers.get_mut(hold.target.tier()) else {
            return Ok(TierAcquire::UnknownTier);
        };
        if counter.available < quantity {
            return Ok(TierAcquire::Insufficient {
                available: counter.available,
            });
        }
        counter.available -= quantity;
        state.holds.insert(
            hold.checkout_id,
            HoldEntry {
                hold: hold.clone(),
                claim: None,
            },
        );
        Ok(TierAcquire::Acquired)
    }

    async fn acquire_unit(&self, hold: &Hold) -> Result<UnitAcquire> {
        let mut state = self.lock()?;
        state.reclaim(hold.created_at);

        let Some(number) = hold.target.unit_number() else {
            return Ok(UnitAcquire::OutOfRange);
        };
        let Some(counter) = state.tiers.get(hold.target.tier()) else {
            return Ok(UnitAcquire::UnknownTier);
        };
        if number == 0 || number > counter.capacity {
            return Ok(UnitAcquire::OutOfRange);
        }

        match counter.units.get(&number).copied() {
            Some(UnitSlot::Held(owner)) => {
                return Ok(match state.holds.get(&owner) {
                    Some(entry) if !entry.claimed() && entry.hold.session_id == hold.session_id => {
                        UnitAcquire::AlreadyHeld(entry.hold.clone())
                    }
                    _ => UnitAcquire::Locked,
                });
            }
            Some(UnitSlot::Sold) => return Ok(UnitAcquire::Locked),
            None if counter.available == 0 => return Ok(UnitAcquire::Locked),
            None => {}
        }

        if let Some(counter) = state.tiers.get_mut(hold.target.tier()) {
            counter.available -= 1;
            counter.units.insert(number, UnitSlot::Held(hold.checkout_id));
        }
        state.holds.insert(
            hold.checkout_id,
            HoldEntry {
                hold: hold.clone(),
                claim: None,
            },
        );
        Ok(UnitAcquire::Acquired)
    }

    async fn release(
        &self,
        checkout_id: CheckoutId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome> {
        let mut state = self.lock()?;
        state.reclaim(now);

        match state.holds.get(&checkout_id) {
            None => return Ok(ReleaseOutcome::NotFound),
            Some(entry) if entry.claimed() => return Ok(ReleaseOutcome::NotFound),
            Some(entry) if entry.hold.session_id != *session_id => {
                return Ok(ReleaseOutcome::NotOwned);
            }
            Some(_) => {}
        }

        let Some(entry) = state.holds.remove(&checkout_id) else {
            return Ok(ReleaseOutcome::NotFound);
        };
        state.give_back(&entry.hold);
        Ok(ReleaseOutcome::Released(entry.hold))
    }

    async fn hold(&self, checkout_id: CheckoutId, now: DateTime<Utc>) -> Result<Option<Hold>> {
        let mut state = self.lock()?;
        state.reclaim(now);
        Ok(state
            .holds
            .get(&checkout_id)
            .filter(|e| !e.claimed())
            .map(|e| e.hold.clone()))
    }

    async fn session_holds(&self, session_id: &SessionId, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        let mut state = self.lock()?;
        state.reclaim(now);
        let mut holds: Vec<Hold> = state
            .holds
            .values()
            .filter(|e| !e.claimed() && e.hold.session_id == *session_id)
            .map(|e| e.hold.clone())
            .collect();
        holds.sort_by_key(|h| h.created_at);
        Ok(holds)
    }

    async fn claim(
        &self,
        checkout_id: CheckoutId,
        token: ClaimToken,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let mut state = self.lock()?;

        let outcome = match state.holds.get_mut(&checkout_id) {
            None => ClaimOutcome::Missing,
            Some(entry) => match entry.claim {
                Some(owner) if owner == token => ClaimOutcome::Claimed(entry.hold.clone()),
                Some(_) => ClaimOutcome::InProgress,
                None if entry.hold.is_expired(now) => ClaimOutcome::Expired,
                None => {
                    entry.claim = Some(token);
                    ClaimOutcome::Claimed(entry.hold.clone())
                }
            },
        };

        state.reclaim(now);
        Ok(outcome)
    }

    async fn claimed_holds(&self, tier: &TierId) -> Result<Vec<ClaimedHold>> {
        let state = self.lock()?;
        Ok(state
            .holds
            .values()
            .filter(|e| e.hold.target.tier() == tier)
            .filter_map(|e| {
                e.claim.map(|token| ClaimedHold {
                    hold: e.hold.clone(),
                    token,
                })
            })
            .collect())
    }

    async fn settle(&self, hold: &Hold, token: ClaimToken) -> Result<bool> {
        let mut state = self.lock()?;
        if !state.claimed_by(hold.checkout_id, token) {
            return Ok(false);
        }
        state.holds.remove(&hold.checkout_id);
        if let (Some(number), Some(counter)) = (
            hold.target.unit_number(),
            state.tiers.get_mut(hold.target.tier()),
        ) {
            counter.units.insert(number, UnitSlot::Sold);
        }
        Ok(true)
    }

    async fn unclaim(&self, hold: &Hold, token: ClaimToken) -> Result<bool> {
        let mut state = self.lock()?;
        if !state.claimed_by(hold.checkout_id, token) {
            return Ok(false);
        }
        if let Some(entry) = state.holds.remove(&hold.checkout_id) {
            state.give_back(&entry.hold);
        }
        Ok(true)
    }

    async fn add_capacity(
        &self,
        tier: &TierId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let mut state = self.lock()?;
        state.reclaim(now);
        Ok(state.tiers.get_mut(tier).map(|counter| {
            counter.capacity = counter.capacity.saturating_add(quantity);
            counter.available = counter.available.saturating_add(quantity);
            counter.available
        }))
    }

    async fn remove_capacity(
        &self,
        tier: &TierId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<CapacityRemoval> {
        let mut state = self.lock()?;
        state.reclaim(now);

        let Some(counter) = state.tiers.get_mut(tier) else {
            return Ok(CapacityRemoval::UnknownTier);
        };
        if quantity > counter.available {
            return Ok(CapacityRemoval::Insufficient {
                available: counter.available,
            });
        }
        let new_capacity = counter.capacity.saturating_sub(quantity);
        if counter.units.keys().any(|&n| n > new_capacity) {
            return Ok(CapacityRemoval::UnitsInUse);
        }

        counter.capacity = new_capacity;
        counter.available -= quantity;
        Ok(CapacityRemoval::Removed {
            available: counter.available,
        })
    }
}
