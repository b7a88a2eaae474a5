//! # Softlock Core
//!
//! Soft-lock allocation of finite ticket inventory.
//!
//! Buyers take short-lived **holds** on capacity (a quantity from a counted
//! tier, or one specific numbered unit), group several holds into a pending
//! order, and **finalize** them into tickets. Holds that are neither
//! finalized nor released lapse on their own and their capacity returns to
//! the pool on the next touch of the tier.
//!
//! ## Components
//!
//! - [`HoldManager`] - atomic acquire/release of holds on the counter store
//! - [`ReservationCoordinator`] - all-or-nothing multi-item reservations
//! - [`Finalizer`] - idempotent conversion of holds into signed tickets
//! - [`AdminAdjuster`] - capacity changes that keep both stores consistent
//! - [`RequestGuard`] - per-client rate limits on reserve and finalize
//!
//! ## Stores
//!
//! The engine talks to two stores through traits in [`providers`]:
//!
//! - a **counter store** (Redis) that owns live availability and holds
//! - a **ledger** (`PostgreSQL`) that owns `total`, `sold`, orders and tickets
//!
//! The ledger is the store of record. The counter store is rebuilt from it
//! by [`AdminAdjuster::reconcile`].
//!
//! ## Example
//!
//! ```
//! use softlock_core::mocks::{InMemoryCounterStore, ManualClock};
//! use softlock_core::{Clock, HoldManager, SessionId, TierId};
//! use softlock_core::providers::CounterStore;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let clock = Arc::new(ManualClock::default());
//! let store = Arc::new(InMemoryCounterStore::new());
//! let gold = TierId::new("gold");
//! store.reconcile_tier(&gold, 100, 100, clock.now()).await.unwrap();
//!
//! let holds = HoldManager::new(store, clock);
//! let hold = holds
//!     .acquire_tier(&gold, 2, &SessionId::new("s-1"), chrono::Duration::minutes(5))
//!     .await
//!     .unwrap();
//! assert_eq!(hold.target.quantity(), 2);
//! # });
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod admin;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod environment;
pub mod error;
pub mod finalizer;
pub mod hold;
pub mod metrics;
pub mod providers;
pub mod qr;
pub mod rate_limit;
pub mod stores;
pub mod types;

/// In-memory providers for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use admin::AdminAdjuster;
pub use config::{Config, EngineSettings};
pub use coordinator::{ReservationCoordinator, ReservationLimits};
pub use engine::{Backend, Engine, Providers};
pub use environment::{Clock, SystemClock};
pub use error::{AllocError, Result};
pub use finalizer::Finalizer;
pub use hold::HoldManager;
pub use qr::QrSigner;
pub use rate_limit::{RateLimitPolicy, RequestGuard, Scope};
pub use types::{
    AdjustOutcome, Buyer, CheckoutId, ClaimToken, FinalizeOutcome, Hold, HoldTarget, LineItem,
    LineStatus, Money, Order, OrderId, OrderStatus, Reservation, ReservationItem, SessionId,
    Ticket, TicketId, Tier, TierAvailability, TierConfigUpdate, TierDefinition, TierId, TierKind,
    UnitId, UnitStatus,
};
