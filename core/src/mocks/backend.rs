//! Backend made of the in-memory providers.

use crate::engine::Backend;
use crate::mocks::{InMemoryCounterStore, InMemoryLedger, InMemoryRateLimiter, RecordingIssuer};

/// In-memory backend for tests and local experiments.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBackend;

impl Backend for MockBackend {
    type Counter = InMemoryCounterStore;
    type Ledger = InMemoryLedger;
    type Limiter = InMemoryRateLimiter;
    type Issuer = RecordingIssuer;
}
