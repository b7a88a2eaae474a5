//! Engine harness over the in-memory backend.
//!
//! Builds a complete [`Engine`] with a manual clock and keeps handles to
//! every mock so tests can inspect store state directly.

#![allow(clippy::module_name_repetitions)] // TestHarness is the natural name

use chrono::{DateTime, Duration, Utc};
use softlock_core::config::EngineSettings;
use softlock_core::engine::{Engine, Providers};
use softlock_core::environment::Clock;
use softlock_core::mocks::{
    InMemoryCounterStore, InMemoryLedger, InMemoryRateLimiter, ManualClock, MockBackend,
    RecordingIssuer,
};
use softlock_core::providers::{CounterStore, Ledger};
use softlock_core::{Money, QrSigner, Tier, TierDefinition, TierId, TierKind};
use std::sync::Arc;

/// Secret used to sign QR payloads in tests.
pub const TEST_QR_SECRET: &str = "softlock-test-signing-secret";

/// Snapshot of the four quantities of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryBalance {
    /// Live available count from the counter store
    pub available: u32,
    /// Quantity under live or claimed holds
    pub held: u32,
    /// Ledger `sold`
    pub sold: u32,
    /// Ledger `total`
    pub total: u32,
}

impl InventoryBalance {
    /// `available + held + sold == total`
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.available as u64 + self.held as u64 + self.sold as u64 == self.total as u64
    }
}

/// Fluent builder for [`TestHarness`].
///
/// # Example
///
/// ```
/// use softlock_testing::TestHarness;
///
/// # tokio_test::block_on(async {
/// let harness = TestHarness::builder()
///     .counted("gold", 500_000, 50)
///     .numbered("lottery", 10_000, 100)
///     .build()
///     .await;
///
/// let tiers = harness.engine.admin.list_tiers().await.unwrap();
/// assert_eq!(tiers.len(), 2);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct HarnessBuilder {
    settings: EngineSettings,
    tiers: Vec<(TierDefinition, u32)>,
}

impl HarnessBuilder {
    /// Add a counted tier with `total` capacity.
    #[must_use]
    pub fn counted(self, id: &str, price_minor: u64, total: u32) -> Self {
        self.tier(id, TierKind::Counted, price_minor, total)
    }

    /// Add a numbered tier with units `1..=total`.
    #[must_use]
    pub fn numbered(self, id: &str, price_minor: u64, total: u32) -> Self {
        self.tier(id, TierKind::Numbered, price_minor, total)
    }

    /// Default hold lifetime.
    #[must_use]
    pub fn hold_ttl(mut self, ttl: Duration) -> Self {
        self.settings.limits.hold_ttl = ttl;
        self
    }

    /// Replace all engine settings.
    #[must_use]
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    fn tier(mut self, id: &str, kind: TierKind, price_minor: u64, total: u32) -> Self {
        let mut name = id.to_string();
        if let Some(first) = name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        self.tiers.push((
            TierDefinition {
                id: TierId::new(id),
                name,
                description: None,
                price: Money::from_minor(price_minor),
                kind,
            },
            total,
        ));
        self
    }

    /// Wire the engine and create the tiers.
    ///
    /// # Panics
    ///
    /// Panics if a tier cannot be defined or initialized, which only happens
    /// for invalid tier ids or duplicate tiers in the builder.
    #[allow(clippy::expect_used)]
    pub async fn build(self) -> TestHarness {
        let clock = ManualClock::default();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let counter = InMemoryCounterStore::new();
        let ledger = InMemoryLedger::new();
        let issuer = RecordingIssuer::new();
        let limiter = InMemoryRateLimiter::new(Arc::clone(&shared_clock));

        let engine = Engine::<MockBackend>::new(
            Providers {
                counter: counter.clone(),
                ledger: ledger.clone(),
                limiter,
                issuer: issuer.clone(),
            },
            QrSigner::new(TEST_QR_SECRET).expect("test secret is long enough"),
            shared_clock,
            self.settings,
        );

        for (definition, total) in &self.tiers {
            engine
                .admin
                .define_tier(definition)
                .await
                .expect("tier definition should be valid");
            engine
                .admin
                .initialize(&definition.id, i64::from(*total))
                .await
                .expect("tier initialization should succeed");
        }

        TestHarness {
            engine,
            clock,
            counter,
            ledger,
            issuer,
        }
    }
}

/// A wired engine plus handles to its in-memory stores.
pub struct TestHarness {
    /// The engine under test
    pub engine: Engine<MockBackend>,
    /// Clock shared with the engine
    pub clock: ManualClock,
    /// Counter store shared with the engine
    pub counter: InMemoryCounterStore,
    /// Ledger shared with the engine
    pub ledger: InMemoryLedger,
    /// Issuer shared with the engine
    pub issuer: RecordingIssuer,
}

impl TestHarness {
    /// Start building a harness.
    #[must_use]
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            settings: EngineSettings::default(),
            tiers: Vec::new(),
        }
    }

    /// Current time of the shared clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Move the shared clock forward by `seconds`.
    pub fn advance(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }

    /// Ledger row of a tier.
    ///
    /// # Panics
    ///
    /// Panics if the tier does not exist.
    #[allow(clippy::expect_used)]
    pub async fn tier(&self, id: &str) -> Tier {
        self.ledger
            .tier(&TierId::new(id))
            .await
            .expect("ledger should be available")
            .expect("tier should exist")
    }

    /// Current balance of a tier, reclaiming lapsed holds first.
    ///
    /// # Panics
    ///
    /// Panics if the tier does not exist in both stores.
    #[allow(clippy::expect_used)]
    pub async fn balance(&self, id: &str) -> InventoryBalance {
        let tier_id = TierId::new(id);
        let available = self
            .counter
            .available(&tier_id, self.clock.now())
            .await
            .expect("counter store should be available")
            .expect("tier should have a counter");
        let tier = self.tier(id).await;

        InventoryBalance {
            available,
            held: self.counter.held(&tier_id),
            sold: tier.sold,
            total: tier.total,
        }
    }

    /// Assert `available + held + sold == total` for a tier.
    ///
    /// # Panics
    ///
    /// Panics if the tier is out of balance.
    #[allow(clippy::panic)]
    pub async fn assert_balanced(&self, id: &str) {
        let balance = self.balance(id).await;
        if !balance.is_balanced() {
            panic!("tier {id} is out of balance: {balance:?}");
        }
    }
}
