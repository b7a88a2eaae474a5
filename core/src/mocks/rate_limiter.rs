//! Mock rate limiter for testing.

use crate::environment::Clock;
use crate::error::{AllocError, Result};
use crate::providers::RateLimiter;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: DateTime<Utc>,
    count: u32,
}

/// In-memory fixed-window rate limiter driven by an injected clock.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    windows: Arc<Mutex<HashMap<String, Window>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimiter {
    /// Create a limiter reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }
}

impl std::fmt::Debug for InMemoryRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRateLimiter").finish_non_exhaustive()
    }
}

impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_record(&self, key: &str, max_requests: u32, window: Duration) -> Result<()> {
        let now = self.clock.now();
        let window_len = chrono::Duration::from_std(window)
            .map_err(|e| AllocError::ValidationError(format!("Invalid window: {e}")))?;

        let mut windows = self
            .windows
            .lock()
            .map_err(|_| AllocError::StoreUnavailable("Mutex lock failed".into()))?;

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now >= entry.started + window_len {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= max_requests {
            let retry_after = (entry.started + window_len - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            tracing::debug!(key = %key, count = entry.count, "Mock rate limit exceeded");
            return Err(AllocError::RateLimited { retry_after });
        }

        entry.count += 1;
        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.windows
            .lock()
            .map_err(|_| AllocError::StoreUnavailable("Mutex lock failed".into()))?
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::ManualClock;

    #[tokio::test]
    async fn test_window_resets_after_it_elapses() {
        let clock = ManualClock::default();
        let limiter = InMemoryRateLimiter::new(Arc::new(clock.clone()));
        let window = Duration::from_secs(60);

        limiter.check_and_record("reserve:1.2.3.4", 2, window).await.unwrap();
        limiter.check_and_record("reserve:1.2.3.4", 2, window).await.unwrap();

        clock.advance(chrono::Duration::seconds(20));
        let err = limiter
            .check_and_record("reserve:1.2.3.4", 2, window)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AllocError::RateLimited {
                retry_after: Duration::from_secs(40)
            }
        );

        // Other keys have their own budget
        limiter.check_and_record("reserve:5.6.7.8", 2, window).await.unwrap();

        clock.advance(chrono::Duration::seconds(40));
        limiter.check_and_record("reserve:1.2.3.4", 2, window).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_clears_budget() {
        let limiter = InMemoryRateLimiter::new(Arc::new(ManualClock::default()));
        let window = Duration::from_secs(60);

        limiter.check_and_record("k", 1, window).await.unwrap();
        assert!(limiter.check_and_record("k", 1, window).await.is_err());

        limiter.reset("k").await.unwrap();
        limiter.check_and_record("k", 1, window).await.unwrap();
    }
}
