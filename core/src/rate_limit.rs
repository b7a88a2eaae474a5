//! Per-client request budgets in front of reserve and finalize.

use crate::error::{AllocError, Result};
use crate::metrics;
use crate::providers::RateLimiter;
use std::sync::Arc;
use std::time::Duration;

/// Which operation a request is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// `reserve` calls
    Reserve,
    /// `finalize` calls
    Finalize,
}

impl Scope {
    /// Key segment for the scope.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reserve => "reserve",
            Self::Finalize => "finalize",
        }
    }
}

/// Requests allowed per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
}

impl RateLimitPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Applies the reserve and finalize policies to client addresses.
pub struct RequestGuard<R> {
    limiter: Arc<R>,
    reserve: RateLimitPolicy,
    finalize: RateLimitPolicy,
}

impl<R: RateLimiter> RequestGuard<R> {
    /// Create a guard.
    #[must_use]
    pub fn new(limiter: Arc<R>, reserve: RateLimitPolicy, finalize: RateLimitPolicy) -> Self {
        Self {
            limiter,
            reserve,
            finalize,
        }
    }

    /// Count one request from `client` against `scope`.
    ///
    /// Never touches inventory.
    ///
    /// # Errors
    ///
    /// - [`AllocError::RateLimited`] when the client is over budget
    /// - [`AllocError::StoreUnavailable`] if the limiter store fails
    pub async fn check(&self, scope: Scope, client: &str) -> Result<()> {
        let policy = match scope {
            Scope::Reserve => self.reserve,
            Scope::Finalize => self.finalize,
        };
        let key = format!("{}:{client}", scope.as_str());

        let result = self
            .limiter
            .check_and_record(&key, policy.max_requests, policy.window)
            .await;

        if let Err(AllocError::RateLimited { retry_after }) = &result {
            tracing::warn!(
                scope = scope.as_str(),
                client = %client,
                retry_after_ms = retry_after.as_millis(),
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(scope.as_str());
        }
        result
    }

    /// Clear a client's budget for `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::StoreUnavailable`] if the limiter store fails.
    pub async fn reset(&self, scope: Scope, client: &str) -> Result<()> {
        self.limiter
            .reset(&format!("{}:{client}", scope.as_str()))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{InMemoryRateLimiter, ManualClock};

    #[tokio::test]
    async fn test_scopes_have_separate_budgets() {
        let limiter = InMemoryRateLimiter::new(Arc::new(ManualClock::default()));
        let guard = RequestGuard::new(
            Arc::new(limiter),
            RateLimitPolicy::new(1, Duration::from_secs(60)),
            RateLimitPolicy::new(2, Duration::from_secs(60)),
        );

        guard.check(Scope::Reserve, "10.0.0.1").await.unwrap();
        let err = guard.check(Scope::Reserve, "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, AllocError::RateLimited { .. }));

        guard.check(Scope::Finalize, "10.0.0.1").await.unwrap();
        guard.check(Scope::Finalize, "10.0.0.1").await.unwrap();
        assert!(guard.check(Scope::Finalize, "10.0.0.1").await.is_err());

        guard.reset(Scope::Reserve, "10.0.0.1").await.unwrap();
        guard.check(Scope::Reserve, "10.0.0.1").await.unwrap();
    }
}
