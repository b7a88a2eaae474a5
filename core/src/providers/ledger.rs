//! Durable ledger trait.
//!
//! The ledger is the store of record: tiers with their `total` and `sold`
//! counters, orders with line items, and minted tickets. The counter store is
//! treated as a cache that can be rebuilt from it.

use crate::error::Result;
use crate::types::{
    Buyer, CheckoutId, LineStatus, Order, OrderId, Ticket, Tier, TierConfigUpdate,
    TierDefinition, TierId,
};
use chrono::{DateTime, Utc};

/// Everything written by one fulfillment commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulfillment {
    /// Order owning the line
    pub order_id: OrderId,
    /// Hold being converted
    pub checkout_id: CheckoutId,
    /// Buyer details to attach to the order
    pub buyer: Buyer,
    /// One ticket per unit, already signed
    pub tickets: Vec<Ticket>,
    /// Commit time
    pub at: DateTime<Utc>,
}

/// Outcome of a fulfillment commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Tickets inserted, `sold` incremented, line fulfilled
    Committed(Order),
    /// The line was fulfilled by an earlier call; nothing written
    AlreadyFulfilled(Vec<Ticket>),
    /// The line was released; nothing written
    LineClosed(LineStatus),
    /// `sold + quantity` would exceed `total`; nothing written
    SoldOut,
    /// No order line references the checkout id
    MissingLine,
}

/// Durable ledger of tiers, orders and tickets.
///
/// # Implementation
///
/// `PostgreSQL` in production ([`crate::stores::postgres::PostgresLedger`]),
/// in memory for tests ([`crate::mocks::InMemoryLedger`]).
pub trait Ledger: Send + Sync {
    /// All tiers, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the ledger fails.
    fn list_tiers(&self) -> impl std::future::Future<Output = Result<Vec<Tier>>> + Send;

    /// One tier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the ledger fails.
    fn tier(&self, id: &TierId) -> impl std::future::Future<Output = Result<Option<Tier>>> + Send;

    /// Create a tier with zero capacity.
    ///
    /// # Errors
    ///
    /// - [`crate::AllocError::AdminConflict`] if the tier already exists
    /// - [`crate::AllocError::StoreUnavailable`] if the ledger fails
    fn define_tier(
        &self,
        definition: &TierDefinition,
    ) -> impl std::future::Future<Output = Result<Tier>> + Send;

    /// Set a tier's total.
    ///
    /// # Errors
    ///
    /// - [`crate::AllocError::UnknownTier`] if the tier does not exist
    /// - [`crate::AllocError::AdminConflict`] if `total < sold`
    /// - [`crate::AllocError::StoreUnavailable`] if the ledger fails
    fn set_total(
        &self,
        id: &TierId,
        total: u32,
    ) -> impl std::future::Future<Output = Result<Tier>> + Send;

    /// Add `delta` (possibly negative) to a tier's total in one statement.
    ///
    /// # Errors
    ///
    /// - [`crate::AllocError::UnknownTier`] if the tier does not exist
    /// - [`crate::AllocError::AdminConflict`] if the new total would drop
    ///   below `sold` or zero
    /// - [`crate::AllocError::StoreUnavailable`] if the ledger fails
    fn adjust_total(
        &self,
        id: &TierId,
        delta: i64,
    ) -> impl std::future::Future<Output = Result<Tier>> + Send;

    /// Update display metadata.
    ///
    /// # Errors
    ///
    /// - [`crate::AllocError::UnknownTier`] if the tier does not exist
    /// - [`crate::AllocError::StoreUnavailable`] if the ledger fails
    fn update_tier_config(
        &self,
        id: &TierId,
        update: &TierConfigUpdate,
    ) -> impl std::future::Future<Output = Result<Tier>> + Send;

    /// Persist a new pending order with its lines.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the ledger fails.
    fn create_order(&self, order: &Order) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Load an order with its lines.
    ///
    /// Open lines whose hold expired before `now` are closed as lapsed first
    /// and the change is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the ledger fails.
    fn order(
        &self,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<Order>>> + Send;

    /// Load the order owning the line backed by `checkout_id`, lapsing
    /// expired lines like [`Ledger::order`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the ledger fails.
    fn order_for_checkout(
        &self,
        checkout_id: CheckoutId,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<Order>>> + Send;

    /// Close every open line of `tier` whose hold expired before `now` as
    /// lapsed. Returns the number of lines closed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the ledger fails.
    fn lapse_expired_lines(
        &self,
        tier: &TierId,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u32>> + Send;

    /// Move an open line to `status` and re-derive the order status.
    ///
    /// Lines that are not open are left untouched. Returns the order, or
    /// `None` when no line references `checkout_id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the ledger fails.
    fn close_line(
        &self,
        checkout_id: CheckoutId,
        status: LineStatus,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<Order>>> + Send;

    /// In one transaction: increment `sold` guarded by `sold + qty ≤ total`,
    /// insert the tickets, mark the line fulfilled and attach the buyer.
    ///
    /// A lapsed line is still committed. The caller holds a claim taken
    /// before the hold expired, so its capacity was never reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the ledger fails.
    fn commit_fulfillment(
        &self,
        fulfillment: &Fulfillment,
    ) -> impl std::future::Future<Output = Result<CommitOutcome>> + Send;

    /// Tickets minted for a hold.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the ledger fails.
    fn tickets_for_checkout(
        &self,
        checkout_id: CheckoutId,
    ) -> impl std::future::Future<Output = Result<Vec<Ticket>>> + Send;
}
