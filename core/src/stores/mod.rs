//! Storage implementations for the engine.
//!
//! - **Counter Store** (Redis) - Live availability, holds with TTL, unit locks
//! - **Rate Limiter** (Redis) - Fixed-window request budgets shared by every instance
//! - **Ledger** (PostgreSQL) - Tiers, orders and tickets of record

pub mod counter_redis;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod rate_limiter_redis;

// Re-exports
pub use counter_redis::RedisCounterStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLedger;
pub use rate_limiter_redis::RedisRateLimiter;

#[cfg(feature = "postgres")]
pub use production::ProductionBackend;

#[cfg(feature = "postgres")]
mod production {
    use super::{PostgresLedger, RedisCounterStore, RedisRateLimiter};
    use crate::config::Config;
    use crate::engine::{Backend, Providers};
    use crate::error::Result;
    use crate::providers::ConsoleIssuer;

    /// Redis counters and limiter, `PostgreSQL` ledger, console issuance.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ProductionBackend;

    impl Backend for ProductionBackend {
        type Counter = RedisCounterStore;
        type Ledger = PostgresLedger;
        type Limiter = RedisRateLimiter;
        type Issuer = ConsoleIssuer;
    }

    impl ProductionBackend {
        /// Connect every store named in `config` and run ledger migrations.
        ///
        /// # Errors
        ///
        /// Returns [`crate::AllocError::StoreUnavailable`] if Redis or
        /// `PostgreSQL` cannot be reached, or migrations fail.
        pub async fn connect(config: &Config) -> Result<Providers<Self>> {
            let ledger = PostgresLedger::connect(&config.postgres).await?;
            ledger.migrate().await?;

            let counter = RedisCounterStore::new(&config.redis.url).await?;
            let limiter = RedisRateLimiter::new(&config.redis.url).await?;

            tracing::info!("Connected to Redis and PostgreSQL");

            Ok(Providers {
                counter,
                ledger,
                limiter,
                issuer: ConsoleIssuer::new(),
            })
        }
    }
}
