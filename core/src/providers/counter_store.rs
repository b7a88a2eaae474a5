//! Fast counter store trait.
//!
//! The counter store holds each tier's live `available` count, the status of
//! numbered units, and the TTL-bearing hold records. Every method is one
//! atomic primitive: implementations must never split a check from the write
//! it guards, and each primitive first returns the capacity of lapsed holds
//! on the tier it touches (lazy reclamation, no reaper).
//!
//! # Implementation
//!
//! Redis with Lua scripts in production ([`crate::stores::RedisCounterStore`]),
//! a mutex-guarded map in tests ([`crate::mocks::InMemoryCounterStore`]).

use crate::error::Result;
use crate::types::{CheckoutId, ClaimToken, Hold, SessionId, TierId};
use chrono::{DateTime, Utc};

/// Outcome of a conditional decrement on a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierAcquire {
    /// Capacity decremented and hold recorded
    Acquired,
    /// Not enough live capacity
    Insufficient {
        /// Availability seen by the primitive
        available: u32,
    },
    /// Tier has no counter
    UnknownTier,
}

/// Outcome of a unit status transition `available → held`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitAcquire {
    /// Unit was available and is now held by the new hold
    Acquired,
    /// Unit is already held by the same session; the existing hold is returned
    AlreadyHeld(Hold),
    /// Unit is held by another session or sold
    Locked,
    /// Unit number is outside `1..=capacity`
    OutOfRange,
    /// Tier has no counter
    UnknownTier,
}

/// Outcome of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Hold removed and its capacity returned
    Released(Hold),
    /// No live hold with that id (already released, expired or settled)
    NotFound,
    /// Hold belongs to another session; nothing changed
    NotOwned,
}

/// Outcome of claiming a hold for conversion into a sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Hold is pinned under the caller's token: it no longer expires and
    /// cannot be released
    Claimed(Hold),
    /// Hold is pinned by another finalize call
    InProgress,
    /// No hold with that id
    Missing,
    /// Hold existed but `now > expires_at`; its capacity has been reclaimed
    Expired,
}

/// A pinned hold together with the token of the call that pinned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedHold {
    /// The pinned hold
    pub hold: Hold,
    /// Token passed to [`CounterStore::claim`]
    pub token: ClaimToken,
}

/// Outcome of an admin capacity removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityRemoval {
    /// Capacity removed; live availability afterwards
    Removed {
        /// Live availability after the removal
        available: u32,
    },
    /// Removal exceeds live availability; nothing changed
    Insufficient {
        /// Live availability at call time
        available: u32,
    },
    /// A numbered unit above the new capacity is held or sold; nothing changed
    UnitsInUse,
    /// Tier has no counter
    UnknownTier,
}

/// Fast counter store for live availability and holds.
pub trait CounterStore: Send + Sync {
    /// Set a tier's capacity and recompute `available` as `unsold` minus the
    /// quantity of live and claimed holds.
    ///
    /// Returns the new live availability.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn reconcile_tier(
        &self,
        tier: &TierId,
        capacity: u32,
        unsold: u32,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u32>> + Send;

    /// Live availability, or `None` for an unknown tier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn available(
        &self,
        tier: &TierId,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<u32>>> + Send;

    /// Atomically check `available ≥ quantity`, decrement, and record the hold.
    ///
    /// `hold.created_at` is the current time.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn acquire_tier(
        &self,
        hold: &Hold,
    ) -> impl std::future::Future<Output = Result<TierAcquire>> + Send;

    /// Atomically move a numbered unit from available to held, consuming one
    /// slot of the tier's availability.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn acquire_unit(
        &self,
        hold: &Hold,
    ) -> impl std::future::Future<Output = Result<UnitAcquire>> + Send;

    /// Release a live hold owned by `session_id`, returning its capacity.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn release(
        &self,
        checkout_id: CheckoutId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<ReleaseOutcome>> + Send;

    /// Look up a live (unexpired) hold.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn hold(
        &self,
        checkout_id: CheckoutId,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<Hold>>> + Send;

    /// All live holds of a session.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn session_holds(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Hold>>> + Send;

    /// Pin a hold for conversion under `token`, re-checking expiry at this
    /// instant.
    ///
    /// Claiming again with the same token returns the hold; any other token
    /// gets [`ClaimOutcome::InProgress`] until the claim is settled or
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn claim(
        &self,
        checkout_id: CheckoutId,
        token: ClaimToken,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<ClaimOutcome>> + Send;

    /// Claimed holds of a tier that were never settled or returned.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn claimed_holds(
        &self,
        tier: &TierId,
    ) -> impl std::future::Future<Output = Result<Vec<ClaimedHold>>> + Send;

    /// Delete a hold claimed under `token` after its sale is recorded.
    /// Numbered units become sold; tier capacity stays consumed.
    ///
    /// Returns `false` when the hold is not claimed under `token`; nothing
    /// changes then.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn settle(
        &self,
        hold: &Hold,
        token: ClaimToken,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Return the capacity of a hold claimed under `token` after its sale
    /// could not be recorded.
    ///
    /// Returns `false` when the hold is not claimed under `token`; nothing
    /// changes then.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn unclaim(
        &self,
        hold: &Hold,
        token: ClaimToken,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Increase capacity and availability by `quantity`.
    ///
    /// Returns the new live availability, or `None` for an unknown tier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn add_capacity(
        &self,
        tier: &TierId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<u32>>> + Send;

    /// Decrease capacity and availability by `quantity` if live availability
    /// allows it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn remove_capacity(
        &self,
        tier: &TierId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<CapacityRemoval>> + Send;
}
