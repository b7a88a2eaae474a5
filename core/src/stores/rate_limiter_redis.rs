//! Redis-based rate limiter implementation.
//!
//! Fixed window per key: the first request of a window creates the counter
//! and sets its expiry, later requests only increment it. The counter's
//! remaining TTL is the `retry_after` reported to limited clients.

use crate::error::{AllocError, Result};
use crate::providers::RateLimiter;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// `Redis`-based fixed-window rate limiter.
///
/// # Example
///
/// ```no_run
/// use softlock_core::stores::RedisRateLimiter;
/// use softlock_core::providers::RateLimiter;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = RedisRateLimiter::new("redis://127.0.0.1:6379").await?;
///
/// // 20 reserve calls per minute per client
/// limiter
///     .check_and_record("reserve:203.0.113.7", 20, std::time::Duration::from_secs(60))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisRateLimiter {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisRateLimiter {
    /// Create a new `Redis` rate limiter.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::StoreUnavailable`] if connecting to `Redis` fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            AllocError::StoreUnavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            AllocError::StoreUnavailable(format!(
                "Failed to create Redis connection manager: {e}"
            ))
        })?;

        Ok(Self { conn_manager })
    }

    fn rate_limit_key(key: &str) -> String {
        format!("rate:{key}")
    }
}

impl RateLimiter for RedisRateLimiter {
    async fn check_and_record(&self, key: &str, max_requests: u32, window: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let rate_key = Self::rate_limit_key(key);
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);

        // NX keeps the expiry of the window's first request
        let (count, ttl_ms): (u64, i64) = redis::pipe()
            .atomic()
            .incr(&rate_key, 1)
            .cmd("PEXPIRE")
            .arg(&rate_key)
            .arg(window_ms)
            .arg("NX")
            .ignore()
            .pttl(&rate_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, key = %key, "Redis pipeline failed during rate limit check");
                AllocError::StoreUnavailable(format!("Failed to check and record rate limit: {e}"))
            })?;

        if count > u64::from(max_requests) {
            let retry_after = u64::try_from(ttl_ms)
                .map_or(window, Duration::from_millis);

            tracing::debug!(
                key = %key,
                requests = count,
                max_requests,
                retry_after_ms = retry_after.as_millis(),
                "Rate limit exceeded"
            );
            return Err(AllocError::RateLimited { retry_after });
        }

        tracing::debug!(key = %key, requests = count, max_requests, "Rate limit check passed");
        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn.del(Self::rate_limit_key(key)).await.map_err(|e| {
            AllocError::StoreUnavailable(format!("Failed to reset rate limit: {e}"))
        })?;

        tracing::info!(key = %key, "Reset rate limit");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_limit_enforced_within_window() {
        let limiter = RedisRateLimiter::new("redis://127.0.0.1:6379")
            .await
            .expect("Redis must be running for this test");
        let key = format!("test:{}", uuid::Uuid::new_v4());
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            limiter.check_and_record(&key, 3, window).await.unwrap();
        }

        match limiter.check_and_record(&key, 3, window).await {
            Err(AllocError::RateLimited { retry_after }) => {
                assert!(retry_after <= window);
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("Expected RateLimited, got {other:?}"),
        }

        limiter.reset(&key).await.unwrap();
        limiter.check_and_record(&key, 3, window).await.unwrap();
    }
}
