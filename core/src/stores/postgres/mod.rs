//! `PostgreSQL` storage implementations.
//!
//! The durable ledger: tiers, orders with their lines, and minted tickets.

pub mod ledger;

// Re-exports
pub use ledger::PostgresLedger;
