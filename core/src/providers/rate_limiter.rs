//! Rate limiter trait for reserve and finalize calls.
//!
//! # Implementation
//!
//! Fixed window counters in Redis ([`crate::stores::RedisRateLimiter`]) so that
//! every server instance shares one budget per client address.

use crate::error::Result;
use std::time::Duration;

/// Fixed-window request limiter.
///
/// # Example
///
/// ```no_run
/// use softlock_core::providers::RateLimiter;
/// use std::time::Duration;
///
/// # async fn example(limiter: impl RateLimiter) -> Result<(), Box<dyn std::error::Error>> {
/// limiter
///     .check_and_record("reserve:203.0.113.7", 10, Duration::from_secs(60))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub trait RateLimiter: Send + Sync {
    /// Count one request against `key` and fail if it exceeds `max_requests`
    /// within the current window.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Request allowed and recorded
    /// * `Err(AllocError::RateLimited)` - Limit exceeded, with time until the
    ///   window resets
    ///
    /// # Errors
    ///
    /// - [`crate::AllocError::RateLimited`] when over the limit
    /// - [`crate::AllocError::StoreUnavailable`] if the store fails
    fn check_and_record(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Clear the counter for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AllocError::StoreUnavailable`] if the store fails.
    fn reset(&self, key: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}
