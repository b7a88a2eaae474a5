//! In-memory provider implementations for testing.
//!
//! These stand in for Redis and `PostgreSQL` in unit and integration tests.
//! Every store guards its state with one mutex per call, so the atomicity
//! guarantees of the real stores hold here too.

pub mod backend;
pub mod clock;
pub mod counter;
pub mod issuer;
pub mod ledger;
pub mod rate_limiter;

pub use backend::MockBackend;
pub use clock::ManualClock;
pub use counter::InMemoryCounterStore;
pub use issuer::RecordingIssuer;
pub use ledger::InMemoryLedger;
pub use rate_limiter::InMemoryRateLimiter;
