//! Engine providers.
//!
//! Traits for every external dependency of the engine. The Hold Manager,
//! Coordinator, Finalizer and Admin Adjuster depend only on these traits;
//! the server wires in Redis and `PostgreSQL`, tests wire in the in-memory
//! implementations from [`crate::mocks`].
//!
//! ```text
//!            ┌──────────────────────┐
//!  request ─▶│ Coordinator / Admin  │
//!            │ Finalizer            │
//!            └───┬──────────────┬───┘
//!                │              │
//!                ▼              ▼
//!     ┌────────────────┐  ┌────────────┐
//!     │ CounterStore   │  │ Ledger     │
//!     │ live available │  │ total/sold │
//!     │ holds (TTL)    │  │ orders     │
//!     └────────────────┘  │ tickets    │
//!                         └────────────┘
//! ```

pub mod console_issuer;
pub mod counter_store;
pub mod issuer;
pub mod ledger;
pub mod rate_limiter;

pub use console_issuer::ConsoleIssuer;
pub use counter_store::{
    CapacityRemoval, ClaimOutcome, ClaimedHold, CounterStore, ReleaseOutcome, TierAcquire, UnitAcquire,
};
pub use issuer::{IssuanceRequest, TicketIssuer};
pub use ledger::{CommitOutcome, Fulfillment, Ledger};
pub use rate_limiter::RateLimiter;
