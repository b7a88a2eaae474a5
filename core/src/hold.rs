//! Hold Manager: TTL-bounded soft locks over the counter store.
//!
//! Every operation is a single atomic primitive of the [`CounterStore`]; the
//! manager only translates outcomes into [`AllocError`]s, stamps time from the
//! injected [`Clock`], and emits logs and metrics.

use crate::environment::Clock;
use crate::error::{AllocError, Result};
use crate::metrics;
use crate::providers::{CounterStore, ReleaseOutcome, TierAcquire, UnitAcquire};
use crate::types::{CheckoutId, Hold, HoldTarget, SessionId, TierId, UnitId};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// A unit hold, tagged with whether this call created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UnitHold {
    /// Newly acquired
    Fresh(Hold),
    /// The session already held the unit
    Existing(Hold),
}

/// Acquire, release and list holds.
pub struct HoldManager<C> {
    store: Arc<C>,
    clock: Arc<dyn Clock>,
}

impl<C> Clone for HoldManager<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: CounterStore> HoldManager<C> {
    /// Create a hold manager.
    #[must_use]
    pub fn new(store: Arc<C>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current time from the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Hold `quantity` anonymous slots of `tier` for `ttl`.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ValidationError`] if `quantity` is zero or `ttl` is not positive
    /// - [`AllocError::InsufficientInventory`] if live availability is short
    /// - [`AllocError::UnknownTier`] if the tier has no counter
    /// - [`AllocError::StoreUnavailable`] if the store fails
    pub async fn acquire_tier(
        &self,
        tier: &TierId,
        quantity: u32,
        session_id: &SessionId,
        ttl: Duration,
    ) -> Result<Hold> {
        if quantity == 0 {
            return Err(AllocError::ValidationError(
                "Quantity must be at least 1".into(),
            ));
        }
        Self::check_ttl(ttl)?;

        let hold = Hold::new(
            session_id.clone(),
            HoldTarget::Tier {
                tier: tier.clone(),
                quantity,
            },
            self.clock.now(),
            ttl,
        );

        match self.store.acquire_tier(&hold).await? {
            TierAcquire::Acquired => {
                tracing::info!(
                    checkout_id = %hold.checkout_id,
                    session_id = %session_id,
                    tier = %tier,
                    quantity,
                    expires_at = %hold.expires_at,
                    "Acquired tier hold"
                );
                metrics::record_hold("tier", "acquired");
                Ok(hold)
            }
            TierAcquire::Insufficient { available } => {
                tracing::debug!(tier = %tier, quantity, available, "Tier hold refused");
                metrics::record_hold("tier", "insufficient");
                Err(AllocError::InsufficientInventory {
                    tier: tier.clone(),
                    requested: quantity,
                    available,
                })
            }
            TierAcquire::UnknownTier => Err(AllocError::UnknownTier(tier.clone())),
        }
    }

    /// Hold one numbered unit for `ttl`.
    ///
    /// Re-acquiring a unit the session already holds returns the existing hold
    /// unchanged.
    ///
    /// # Errors
    ///
    /// - [`AllocError::AlreadyLocked`] if another session holds the unit or it is sold
    /// - [`AllocError::ValidationError`] if the unit number is out of range
    /// - [`AllocError::UnknownTier`] if the tier has no counter
    /// - [`AllocError::StoreUnavailable`] if the store fails
    pub async fn acquire_unit(
        &self,
        unit: &UnitId,
        session_id: &SessionId,
        ttl: Duration,
    ) -> Result<Hold> {
        match self.acquire_unit_tracked(unit, session_id, ttl).await? {
            UnitHold::Fresh(hold) | UnitHold::Existing(hold) => Ok(hold),
        }
    }

    pub(crate) async fn acquire_unit_tracked(
        &self,
        unit: &UnitId,
        session_id: &SessionId,
        ttl: Duration,
    ) -> Result<UnitHold> {
        Self::check_ttl(ttl)?;

        let hold = Hold::new(
            session_id.clone(),
            HoldTarget::Unit(unit.clone()),
            self.clock.now(),
            ttl,
        );

        match self.store.acquire_unit(&hold).await? {
            UnitAcquire::Acquired => {
                tracing::info!(
                    checkout_id = %hold.checkout_id,
                    session_id = %session_id,
                    unit = %unit,
                    expires_at = %hold.expires_at,
                    "Acquired unit hold"
                );
                metrics::record_hold("unit", "acquired");
                Ok(UnitHold::Fresh(hold))
            }
            UnitAcquire::AlreadyHeld(existing) => {
                tracing::debug!(
                    checkout_id = %existing.checkout_id,
                    unit = %unit,
                    "Unit already held by this session"
                );
                Ok(UnitHold::Existing(existing))
            }
            UnitAcquire::Locked => {
                metrics::record_hold("unit", "locked");
                Err(AllocError::AlreadyLocked { unit: unit.clone() })
            }
            UnitAcquire::OutOfRange => Err(AllocError::ValidationError(format!(
                "Unit {unit} does not exist"
            ))),
            UnitAcquire::UnknownTier => Err(AllocError::UnknownTier(unit.tier.clone())),
        }
    }

    /// Release a hold and return its capacity.
    ///
    /// Releasing a hold that is absent, expired or already released succeeds
    /// and returns `None`.
    ///
    /// # Errors
    ///
    /// - [`AllocError::HoldNotOwned`] if another session owns the hold
    /// - [`AllocError::StoreUnavailable`] if the store fails
    pub async fn release(
        &self,
        checkout_id: CheckoutId,
        session_id: &SessionId,
    ) -> Result<Option<Hold>> {
        match self
            .store
            .release(checkout_id, session_id, self.clock.now())
            .await?
        {
            ReleaseOutcome::Released(hold) => {
                tracing::info!(
                    checkout_id = %checkout_id,
                    session_id = %session_id,
                    tier = %hold.target.tier(),
                    quantity = hold.target.quantity(),
                    "Released hold"
                );
                metrics::record_release();
                Ok(Some(hold))
            }
            ReleaseOutcome::NotFound => {
                tracing::debug!(checkout_id = %checkout_id, "Release of absent hold ignored");
                Ok(None)
            }
            ReleaseOutcome::NotOwned => {
                tracing::warn!(
                    checkout_id = %checkout_id,
                    session_id = %session_id,
                    "Release attempted by non-owning session"
                );
                Err(AllocError::HoldNotOwned { checkout_id })
            }
        }
    }

    /// Live holds of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::StoreUnavailable`] if the store fails.
    pub async fn list_mine(&self, session_id: &SessionId) -> Result<Vec<Hold>> {
        self.store.session_holds(session_id, self.clock.now()).await
    }

    /// Look up a live hold.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::StoreUnavailable`] if the store fails.
    pub async fn get(&self, checkout_id: CheckoutId) -> Result<Option<Hold>> {
        self.store.hold(checkout_id, self.clock.now()).await
    }

    fn check_ttl(ttl: Duration) -> Result<()> {
        if ttl <= Duration::zero() {
            return Err(AllocError::ValidationError("Hold TTL must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{InMemoryCounterStore, ManualClock};

    async fn manager(capacity: u32) -> (HoldManager<InMemoryCounterStore>, ManualClock) {
        let clock = ManualClock::default();
        let store = InMemoryCounterStore::new();
        store
            .reconcile_tier(&TierId::new("gold"), capacity, capacity, clock.now())
            .await
            .unwrap();
        store
            .reconcile_tier(&TierId::new("lottery"), 100, 100, clock.now())
            .await
            .unwrap();
        (HoldManager::new(Arc::new(store), Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_acquire_tier_reports_availability_on_shortfall() {
        let (holds, _clock) = manager(2).await;
        let gold = TierId::new("gold");

        holds
            .acquire_tier(&gold, 2, &SessionId::new("a"), Duration::minutes(5))
            .await
            .unwrap();
        let err = holds
            .acquire_tier(&gold, 1, &SessionId::new("b"), Duration::minutes(5))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AllocError::InsufficientInventory {
                tier: gold,
                requested: 1,
                available: 0
            }
        );
    }

    #[tokio::test]
    async fn test_reacquiring_own_unit_returns_same_hold() {
        let (holds, _clock) = manager(1).await;
        let unit = UnitId::new("lottery", 7);
        let session = SessionId::new("a");

        let first = holds
            .acquire_unit(&unit, &session, Duration::minutes(5))
            .await
            .unwrap();
        let again = holds
            .acquire_unit(&unit, &session, Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(first, again);

        let err = holds
            .acquire_unit(&unit, &SessionId::new("b"), Duration::minutes(5))
            .await
            .unwrap_err();
        assert_eq!(err, AllocError::AlreadyLocked { unit });
    }

    #[tokio::test]
    async fn test_release_rejects_other_session_and_is_idempotent() {
        let (holds, _clock) = manager(3).await;
        let owner = SessionId::new("a");
        let hold = holds
            .acquire_tier(&TierId::new("gold"), 1, &owner, Duration::minutes(5))
            .await
            .unwrap();

        let err = holds
            .release(hold.checkout_id, &SessionId::new("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocError::HoldNotOwned { .. }));

        assert!(holds.release(hold.checkout_id, &owner).await.unwrap().is_some());
        assert!(holds.release(hold.checkout_id, &owner).await.unwrap().is_none());
        assert!(holds.list_mine(&owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_hold_is_invisible() {
        let (holds, clock) = manager(3).await;
        let session = SessionId::new("a");
        let hold = holds
            .acquire_tier(&TierId::new("gold"), 1, &session, Duration::seconds(5))
            .await
            .unwrap();

        clock.advance(Duration::seconds(5));
        assert_eq!(holds.get(hold.checkout_id).await.unwrap(), Some(hold.clone()));

        clock.advance(Duration::milliseconds(1));
        assert_eq!(holds.get(hold.checkout_id).await.unwrap(), None);
        assert!(holds.list_mine(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tier_and_out_of_range_unit() {
        let (holds, _clock) = manager(1).await;
        let session = SessionId::new("a");

        let err = holds
            .acquire_tier(&TierId::new("platinum"), 1, &session, Duration::minutes(5))
            .await
            .unwrap_err();
        assert_eq!(err, AllocError::UnknownTier(TierId::new("platinum")));

        let err = holds
            .acquire_unit(&UnitId::new("lottery", 101), &session, Duration::minutes(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocError::ValidationError(_)));
    }
}
