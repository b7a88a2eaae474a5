//! Engine assembly.
//!
//! [`Backend`] names the concrete provider types once so the HTTP layer can
//! stay generic over a single parameter; [`Engine`] wires the components
//! around shared providers and one clock.

use crate::admin::AdminAdjuster;
use crate::config::EngineSettings;
use crate::coordinator::ReservationCoordinator;
use crate::environment::Clock;
use crate::finalizer::Finalizer;
use crate::hold::HoldManager;
use crate::providers::{CounterStore, Ledger, RateLimiter, TicketIssuer};
use crate::qr::QrSigner;
use crate::rate_limit::RequestGuard;
use std::sync::Arc;

/// A set of provider implementations.
pub trait Backend: Send + Sync + 'static {
    /// Fast counter store
    type Counter: CounterStore + 'static;
    /// Durable ledger
    type Ledger: Ledger + 'static;
    /// Request rate limiter
    type Limiter: RateLimiter + 'static;
    /// Ticket issuance collaborator
    type Issuer: TicketIssuer;
}

/// Providers handed to [`Engine::new`].
pub struct Providers<B: Backend> {
    /// Counter store
    pub counter: B::Counter,
    /// Ledger
    pub ledger: B::Ledger,
    /// Rate limiter
    pub limiter: B::Limiter,
    /// Issuer
    pub issuer: B::Issuer,
}

/// All engine components over one backend.
pub struct Engine<B: Backend> {
    /// Hold Manager
    pub holds: HoldManager<B::Counter>,
    /// Reservation Coordinator
    pub coordinator: ReservationCoordinator<B::Counter, B::Ledger>,
    /// Fulfillment Finalizer
    pub finalizer: Finalizer<B::Counter, B::Ledger, B::Issuer>,
    /// Admin Adjuster
    pub admin: AdminAdjuster<B::Counter, B::Ledger>,
    /// Rate limit guard
    pub guard: RequestGuard<B::Limiter>,
    clock: Arc<dyn Clock>,
}

impl<B: Backend> Engine<B> {
    /// Wire the components.
    #[must_use]
    pub fn new(
        providers: Providers<B>,
        signer: QrSigner,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let counter = Arc::new(providers.counter);
        let ledger = Arc::new(providers.ledger);

        let holds = HoldManager::new(Arc::clone(&counter), Arc::clone(&clock));
        let coordinator = ReservationCoordinator::new(
            holds.clone(),
            Arc::clone(&ledger),
            Arc::clone(&clock),
            settings.limits,
        );
        let finalizer = Finalizer::new(
            Arc::clone(&counter),
            Arc::clone(&ledger),
            Arc::new(providers.issuer),
            signer,
            Arc::clone(&clock),
        );
        let admin = AdminAdjuster::new(counter, ledger, Arc::clone(&clock));
        let guard = RequestGuard::new(
            Arc::new(providers.limiter),
            settings.reserve_limit,
            settings.finalize_limit,
        );

        Self {
            holds,
            coordinator,
            finalizer,
            admin,
            guard,
            clock,
        }
    }

    /// The engine's clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
