//! Fulfillment Finalizer: converts valid holds into sold tickets.
//!
//! Each checkout id of a batch is handled on its own:
//!
//! 1. Look up the backing order line. A fulfilled line reports its existing
//!    tickets, a closed line is skipped.
//! 2. Claim the hold under a token unique to this call, re-checking expiry
//!    at that instant. A lapsed hold is skipped and its line closed as
//!    lapsed. A hold claimed by a concurrent call is left to that call.
//! 3. Commit the sale in one ledger transaction (`sold` increment guarded by
//!    `total`, tickets, line and buyer).
//! 4. Settle the hold. If the commit did not go through, the claimed hold is
//!    returned to the pool instead. Both only act while the token still
//!    owns the claim.
//!
//! A batch where nothing could be issued fails with
//! [`AllocError::HoldExpired`], or [`AllocError::DuplicateOrder`] when a
//! concurrent call is still paying for one of its lines. Issuance of freshly minted tickets is handed
//! to the [`TicketIssuer`] on a spawned task.

use crate::environment::Clock;
use crate::error::{AllocError, Result};
use crate::metrics;
use crate::providers::{
    ClaimOutcome, CommitOutcome, CounterStore, Fulfillment, IssuanceRequest, Ledger,
    TicketIssuer,
};
use crate::qr::{QrSigner, TicketClaims};
use crate::types::{
    Buyer, CheckoutId, ClaimToken, FinalizeOutcome, Hold, LineStatus, OrderId, Ticket,
    TicketId,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Per-checkout result inside a batch.
enum LineResult {
    Issued {
        order_id: OrderId,
        tickets: Vec<Ticket>,
        fresh: bool,
    },
    /// Claimed by a concurrent finalize that has not committed yet.
    InProgress(OrderId),
    Skipped,
}

/// Turns holds into tickets.
pub struct Finalizer<C, L, I> {
    store: Arc<C>,
    ledger: Arc<L>,
    issuer: Arc<I>,
    signer: QrSigner,
    clock: Arc<dyn Clock>,
}

impl<C, L, I> Finalizer<C, L, I>
where
    C: CounterStore,
    L: Ledger,
    I: TicketIssuer,
{
    /// Create a finalizer.
    #[must_use]
    pub fn new(
        store: Arc<C>,
        ledger: Arc<L>,
        issuer: Arc<I>,
        signer: QrSigner,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            issuer,
            signer,
            clock,
        }
    }

    /// Signer used for ticket QR payloads.
    #[must_use]
    pub const fn signer(&self) -> &QrSigner {
        &self.signer
    }

    /// Finalize a batch of holds for one buyer.
    ///
    /// Retrying a batch is safe: lines fulfilled by an earlier call report
    /// their existing tickets and nothing is minted twice.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ValidationError`] for invalid buyer details or an empty batch
    /// - [`AllocError::HoldExpired`] if no checkout id produced tickets
    /// - [`AllocError::DuplicateOrder`] if nothing was issued because a
    ///   concurrent call holds the claim on a line
    /// - [`AllocError::StoreUnavailable`] if a store fails; claimed holds of
    ///   the failing id are returned to the pool first
    pub async fn finalize(
        &self,
        checkout_ids: &[CheckoutId],
        buyer: &Buyer,
    ) -> Result<FinalizeOutcome> {
        buyer.validate()?;
        if checkout_ids.is_empty() {
            return Err(AllocError::ValidationError("No checkout ids given".into()));
        }

        let mut seen = HashSet::new();
        let mut order_id = None;
        let mut issued = Vec::new();
        let mut skipped = Vec::new();
        let mut in_progress = None;
        let mut fresh: Vec<(OrderId, Vec<Ticket>)> = Vec::new();

        for &checkout_id in checkout_ids {
            if !seen.insert(checkout_id) {
                continue;
            }
            match self.finalize_one(checkout_id, buyer).await? {
                LineResult::Issued {
                    order_id: line_order,
                    tickets,
                    fresh: minted,
                } => {
                    order_id.get_or_insert(line_order);
                    if minted {
                        match fresh.iter_mut().find(|(id, _)| *id == line_order) {
                            Some((_, batch)) => batch.extend(tickets.iter().cloned()),
                            None => fresh.push((line_order, tickets.clone())),
                        }
                    }
                    issued.extend(tickets);
                }
                LineResult::InProgress(line_order) => {
                    in_progress.get_or_insert(line_order);
                    skipped.push(checkout_id);
                }
                LineResult::Skipped => skipped.push(checkout_id),
            }
        }

        metrics::record_finalize_skipped(skipped.len());

        let Some(order_id) = order_id else {
            tracing::info!(skipped = skipped.len(), "Finalize issued nothing");
            return Err(match in_progress {
                Some(order_id) => AllocError::DuplicateOrder { order_id },
                None => AllocError::HoldExpired,
            });
        };

        for (order_id, tickets) in fresh {
            metrics::record_tickets_issued(tickets.len());
            self.request_issuance(IssuanceRequest {
                order_id,
                buyer: buyer.clone(),
                tickets,
            });
        }

        tracing::info!(
            order_id = %order_id,
            issued = issued.len(),
            skipped = skipped.len(),
            "Finalize completed"
        );

        Ok(FinalizeOutcome {
            order_id,
            issued,
            skipped,
        })
    }

    async fn finalize_one(&self, checkout_id: CheckoutId, buyer: &Buyer) -> Result<LineResult> {
        let now = self.clock.now();
        let Some(order) = self.ledger.order_for_checkout(checkout_id, now).await? else {
            tracing::debug!(checkout_id = %checkout_id, "No order line for checkout");
            return Ok(LineResult::Skipped);
        };
        let Some(line) = order.line(checkout_id) else {
            return Ok(LineResult::Skipped);
        };

        match line.status {
            LineStatus::Open => {}
            LineStatus::Fulfilled => {
                tracing::debug!(checkout_id = %checkout_id, "Line already fulfilled");
                return self.already_fulfilled(order.id, checkout_id).await;
            }
            LineStatus::Released | LineStatus::Lapsed => {
                tracing::debug!(
                    checkout_id = %checkout_id,
                    status = line.status.as_str(),
                    "Line closed, skipping"
                );
                return Ok(LineResult::Skipped);
            }
        }

        let token = ClaimToken::new();
        let hold = match self.store.claim(checkout_id, token, now).await? {
            ClaimOutcome::Claimed(hold) => hold,
            ClaimOutcome::InProgress => return self.claimed_elsewhere(checkout_id, now).await,
            ClaimOutcome::Missing | ClaimOutcome::Expired => {
                return self.lapse(checkout_id, now).await;
            }
        };

        let tickets = match self.mint(&hold, order.id, buyer, now) {
            Ok(tickets) => tickets,
            Err(e) => {
                self.unclaim(&hold, token).await;
                return Err(e);
            }
        };
        let fulfillment = Fulfillment {
            order_id: order.id,
            checkout_id,
            buyer: buyer.clone(),
            tickets,
            at: now,
        };

        let outcome = match self.ledger.commit_fulfillment(&fulfillment).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.unclaim(&hold, token).await;
                return Err(e);
            }
        };

        match outcome {
            CommitOutcome::Committed(order) => {
                self.settle(&hold, token).await;
                tracing::info!(
                    checkout_id = %checkout_id,
                    order_id = %order.id,
                    tier = %hold.target.tier(),
                    quantity = hold.target.quantity(),
                    "Hold converted to tickets"
                );
                Ok(LineResult::Issued {
                    order_id: order.id,
                    tickets: fulfillment.tickets,
                    fresh: true,
                })
            }
            CommitOutcome::AlreadyFulfilled(tickets) => {
                self.settle(&hold, token).await;
                Ok(LineResult::Issued {
                    order_id: order.id,
                    tickets,
                    fresh: false,
                })
            }
            CommitOutcome::LineClosed(_) | CommitOutcome::MissingLine => {
                self.unclaim(&hold, token).await;
                Ok(LineResult::Skipped)
            }
            CommitOutcome::SoldOut => {
                tracing::warn!(
                    checkout_id = %checkout_id,
                    tier = %hold.target.tier(),
                    "Ledger refused sale beyond total, counter store needs reconcile"
                );
                self.unclaim(&hold, token).await;
                Ok(LineResult::Skipped)
            }
        }
    }

    /// Report the line of a hold another call has claimed: its tickets once
    /// that call committed, in progress until then.
    async fn claimed_elsewhere(
        &self,
        checkout_id: CheckoutId,
        now: DateTime<Utc>,
    ) -> Result<LineResult> {
        let line = self
            .ledger
            .order_for_checkout(checkout_id, now)
            .await?
            .and_then(|o| o.line(checkout_id).map(|l| (o.id, l.status)));

        match line {
            Some((order_id, LineStatus::Fulfilled)) => {
                self.already_fulfilled(order_id, checkout_id).await
            }
            Some((order_id, _)) => {
                tracing::debug!(checkout_id = %checkout_id, "Hold claimed by a concurrent finalize");
                Ok(LineResult::InProgress(order_id))
            }
            None => Ok(LineResult::Skipped),
        }
    }

    async fn already_fulfilled(
        &self,
        order_id: OrderId,
        checkout_id: CheckoutId,
    ) -> Result<LineResult> {
        let tickets = self.ledger.tickets_for_checkout(checkout_id).await?;
        Ok(LineResult::Issued {
            order_id,
            tickets,
            fresh: false,
        })
    }

    /// Close the line of a hold that is gone. A concurrent finalize may have
    /// fulfilled it in the meantime, in which case its tickets are reported.
    async fn lapse(&self, checkout_id: CheckoutId, now: DateTime<Utc>) -> Result<LineResult> {
        let order = self
            .ledger
            .close_line(checkout_id, LineStatus::Lapsed, now)
            .await?;

        let line = order
            .as_ref()
            .and_then(|o| o.line(checkout_id).map(|l| (o.id, l.status)));
        match line {
            Some((order_id, LineStatus::Fulfilled)) => {
                self.already_fulfilled(order_id, checkout_id).await
            }
            _ => {
                tracing::info!(checkout_id = %checkout_id, "Hold expired before finalize");
                Ok(LineResult::Skipped)
            }
        }
    }

    fn mint(
        &self,
        hold: &Hold,
        order_id: OrderId,
        buyer: &Buyer,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        (0..hold.target.quantity())
            .map(|_| {
                let id = TicketId::new();
                let qr_payload = self.signer.sign(&TicketClaims {
                    ticket_id: id,
                    order_id,
                    tier: hold.target.tier().clone(),
                    unit: hold.target.unit_number(),
                    iat: now.timestamp(),
                })?;
                Ok(Ticket {
                    id,
                    tier: hold.target.tier().clone(),
                    unit_number: hold.target.unit_number(),
                    order_id,
                    checkout_id: hold.checkout_id,
                    buyer_email: buyer.email.clone(),
                    qr_payload,
                    issued_at: now,
                })
            })
            .collect()
    }

    async fn settle(&self, hold: &Hold, token: ClaimToken) {
        if let Err(e) = self.store.settle(hold, token).await {
            // Sale is recorded; the claimed record is settled by reconcile.
            tracing::warn!(
                checkout_id = %hold.checkout_id,
                error = %e,
                "Failed to settle claimed hold, reconcile will clear it"
            );
        }
    }

    async fn unclaim(&self, hold: &Hold, token: ClaimToken) {
        if let Err(e) = self.store.unclaim(hold, token).await {
            tracing::warn!(
                checkout_id = %hold.checkout_id,
                error = %e,
                "Failed to return claimed hold, capacity stays pinned until reconcile"
            );
        }
    }

    fn request_issuance(&self, request: IssuanceRequest) {
        let issuer = Arc::clone(&self.issuer);
        tokio::spawn(async move {
            let order_id = request.order_id;
            let count = request.tickets.len();
            match issuer.issue(request).await {
                Ok(()) => {
                    tracing::debug!(order_id = %order_id, tickets = count, "Issuance requested");
                }
                Err(e) => tracing::warn!(
                    order_id = %order_id,
                    tickets = count,
                    error = %e,
                    "Ticket issuance failed, sale stands"
                ),
            }
        });
    }
}
