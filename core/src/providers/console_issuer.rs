//! Console issuer for development.

use crate::error::Result;
use crate::providers::{IssuanceRequest, TicketIssuer};
use tracing::info;

/// Issuer that logs tickets instead of delivering them.
///
/// Used by the server until a delivery service is wired in.
#[derive(Clone, Debug, Default)]
pub struct ConsoleIssuer;

impl ConsoleIssuer {
    /// Create a new console issuer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TicketIssuer for ConsoleIssuer {
    async fn issue(&self, request: IssuanceRequest) -> Result<()> {
        info!(
            order_id = %request.order_id,
            to = %request.buyer.email,
            tickets = request.tickets.len(),
            "Ticket issuance (development mode)"
        );

        for ticket in &request.tickets {
            let unit = ticket
                .unit_number
                .map_or_else(String::new, |n| format!(" #{n}"));
            println!("  🎟  {}{unit}  {}  {}", ticket.tier, ticket.id, ticket.qr_payload);
        }

        Ok(())
    }
}
