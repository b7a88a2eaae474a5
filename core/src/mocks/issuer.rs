//! Recording issuer for tests.

use crate::error::{AllocError, Result};
use crate::providers::{IssuanceRequest, TicketIssuer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Issuer that stores every request it receives.
///
/// Issuance runs on a spawned task, so tests use [`RecordingIssuer::wait_for`]
/// to wait until the expected number of requests has arrived.
#[derive(Debug, Clone, Default)]
pub struct RecordingIssuer {
    requests: Arc<Mutex<Vec<IssuanceRequest>>>,
    notify: Arc<Notify>,
    failing: Arc<AtomicBool>,
}

impl RecordingIssuer {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `issue` fail (after recording the request).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<IssuanceRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Wait until at least `count` requests were received or `timeout`
    /// elapses. Returns the requests seen.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<IssuanceRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let seen = self.requests();
            if seen.len() >= count {
                return seen;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.requests();
            }
        }
    }
}

impl TicketIssuer for RecordingIssuer {
    async fn issue(&self, request: IssuanceRequest) -> Result<()> {
        self.requests
            .lock()
            .map_err(|_| AllocError::StoreUnavailable("Mutex lock failed".into()))?
            .push(request);
        self.notify.notify_waiters();

        if self.failing.load(Ordering::SeqCst) {
            return Err(AllocError::StoreUnavailable(
                "Issuance service unavailable".into(),
            ));
        }
        Ok(())
    }
}
