//! Ticket issuance collaborator.
//!
//! Rendering and delivering tickets (PDF, email) happens outside the engine.
//! The finalizer hands freshly minted tickets to a [`TicketIssuer`] from a
//! spawned task; failures are logged and never undo the sale.

use crate::error::Result;
use crate::types::{Buyer, OrderId, Ticket};

/// Tickets to deliver to one buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRequest {
    /// Paid order
    pub order_id: OrderId,
    /// Recipient
    pub buyer: Buyer,
    /// Tickets minted by this finalize call
    pub tickets: Vec<Ticket>,
}

/// External ticket issuance.
pub trait TicketIssuer: Send + Sync + 'static {
    /// Deliver tickets to the buyer.
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails. The caller only logs it.
    fn issue(
        &self,
        request: IssuanceRequest,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
