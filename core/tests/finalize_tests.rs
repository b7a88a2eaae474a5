//! Fulfillment: converting holds into tickets.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Duration;
use softlock_core::providers::{ClaimOutcome, CounterStore, Ledger};
use softlock_core::{
    AllocError, Buyer, CheckoutId, ClaimToken, LineStatus, OrderStatus, Reservation,
    ReservationItem,
};
use softlock_testing::{TestHarness, buyer, session};
use std::sync::Arc;
use std::time::Duration as StdDuration;

async fn venue() -> TestHarness {
    TestHarness::builder()
        .counted("gold", 500_000, 10)
        .numbered("lottery", 10_000, 100)
        .build()
        .await
}

async fn reserve(harness: &TestHarness, items: &[ReservationItem], ttl: i64) -> Reservation {
    harness
        .engine
        .coordinator
        .reserve(items, &session("a"), Some(Duration::seconds(ttl)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_finalize_mints_one_ticket_per_unit() {
    let harness = venue().await;
    let reservation = reserve(
        &harness,
        &[
            ReservationItem::tier("gold", 2),
            ReservationItem::unit("lottery", 42),
        ],
        300,
    )
    .await;

    let outcome = harness
        .engine
        .finalizer
        .finalize(&reservation.checkout_ids(), &buyer())
        .await
        .unwrap();

    assert_eq!(outcome.order_id, reservation.order_id);
    assert_eq!(outcome.issued.len(), 3);
    assert!(outcome.skipped.is_empty());
    assert!(outcome.issued.iter().all(|t| t.buyer_email == "asha@example.com"));
    assert_eq!(
        outcome
            .issued
            .iter()
            .filter_map(|t| t.unit_number)
            .collect::<Vec<_>>(),
        vec![42]
    );

    let gold = harness.balance("gold").await;
    assert_eq!((gold.available, gold.held, gold.sold), (8, 0, 2));
    harness.assert_balanced("gold").await;
    harness.assert_balanced("lottery").await;

    let order = harness
        .ledger
        .order(reservation.order_id, harness.now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.buyer, Some(buyer()));
    assert!(order.lines.iter().all(|l| l.status == LineStatus::Fulfilled));
}

#[tokio::test]
async fn test_mixed_batch_issues_only_valid_holds() {
    let harness = venue().await;
    let short = reserve(&harness, &[ReservationItem::tier("gold", 3)], 10).await;
    let long = reserve(&harness, &[ReservationItem::tier("gold", 2)], 300).await;

    harness.advance(11);

    let expired = short.checkout_ids()[0];
    let valid = long.checkout_ids()[0];
    let outcome = harness
        .engine
        .finalizer
        .finalize(&[valid, expired], &buyer())
        .await
        .unwrap();

    assert_eq!(outcome.issued.len(), 2);
    assert_eq!(outcome.skipped, vec![expired]);
    assert_eq!(outcome.order_id, long.order_id);

    let gold = harness.balance("gold").await;
    assert_eq!(gold.sold, 2);
    assert_eq!(gold.available, 8);
    harness.assert_balanced("gold").await;

    let lapsed = harness.ledger.order(short.order_id, harness.now()).await.unwrap().unwrap();
    assert_eq!(lapsed.line(expired).unwrap().status, LineStatus::Lapsed);
    assert_eq!(lapsed.status, OrderStatus::Expired);
}

#[tokio::test]
async fn test_all_expired_batch_fails_without_selling() {
    let harness = venue().await;
    let reservation = reserve(&harness, &[ReservationItem::tier("gold", 4)], 5).await;
    harness.advance(6);

    let err = harness
        .engine
        .finalizer
        .finalize(&reservation.checkout_ids(), &buyer())
        .await
        .unwrap_err();

    assert_eq!(err, AllocError::HoldExpired);
    assert_eq!(harness.tier("gold").await.sold, 0);
    assert!(harness.ledger.all_tickets().is_empty());
    assert_eq!(harness.balance("gold").await.available, 10);
}

#[tokio::test]
async fn test_unknown_checkout_ids_are_skipped() {
    let harness = venue().await;
    let reservation = reserve(&harness, &[ReservationItem::tier("gold", 1)], 300).await;
    let stranger = CheckoutId::new();

    let outcome = harness
        .engine
        .finalizer
        .finalize(&[stranger, reservation.checkout_ids()[0]], &buyer())
        .await
        .unwrap();
    assert_eq!(outcome.skipped, vec![stranger]);
    assert_eq!(outcome.issued.len(), 1);

    let err = harness
        .engine
        .finalizer
        .finalize(&[CheckoutId::new()], &buyer())
        .await
        .unwrap_err();
    assert_eq!(err, AllocError::HoldExpired);
}

#[tokio::test]
async fn test_retry_returns_same_tickets_without_minting_again() {
    let harness = venue().await;
    let reservation = reserve(&harness, &[ReservationItem::tier("gold", 2)], 300).await;
    let ids = reservation.checkout_ids();
    let finalizer = &harness.engine.finalizer;

    let first = finalizer.finalize(&ids, &buyer()).await.unwrap();
    let second = finalizer.finalize(&ids, &buyer()).await.unwrap();

    assert_eq!(first.issued, second.issued);
    assert_eq!(harness.ledger.all_tickets().len(), 2);
    assert_eq!(harness.tier("gold").await.sold, 2);

    // Only the first call hands tickets to the issuer
    let requests = harness.issuer.wait_for(1, StdDuration::from_secs(1)).await;
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(harness.issuer.requests().len(), 1);
}

#[tokio::test]
async fn test_retry_after_expiry_still_reports_fulfilled_line() {
    let harness = venue().await;
    let reservation = reserve(&harness, &[ReservationItem::tier("gold", 1)], 10).await;
    let ids = reservation.checkout_ids();

    let first = harness.engine.finalizer.finalize(&ids, &buyer()).await.unwrap();
    harness.advance(60);
    let second = harness.engine.finalizer.finalize(&ids, &buyer()).await.unwrap();

    assert_eq!(first.issued, second.issued);
    harness.assert_balanced("gold").await;
}

#[tokio::test]
async fn test_issuance_is_requested_per_order() {
    let harness = venue().await;
    let reservation = reserve(
        &harness,
        &[
            ReservationItem::tier("gold", 1),
            ReservationItem::unit("lottery", 3),
        ],
        300,
    )
    .await;

    harness
        .engine
        .finalizer
        .finalize(&reservation.checkout_ids(), &buyer())
        .await
        .unwrap();

    let requests = harness.issuer.wait_for(1, StdDuration::from_secs(1)).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].order_id, reservation.order_id);
    assert_eq!(requests[0].tickets.len(), 2);
    assert_eq!(requests[0].buyer, buyer());
}

#[tokio::test]
async fn test_issuer_failure_does_not_unwind_sale() {
    let harness = venue().await;
    harness.issuer.set_failing(true);
    let reservation = reserve(&harness, &[ReservationItem::tier("gold", 2)], 300).await;

    let outcome = harness
        .engine
        .finalizer
        .finalize(&reservation.checkout_ids(), &buyer())
        .await
        .unwrap();
    assert_eq!(outcome.issued.len(), 2);

    harness.issuer.wait_for(1, StdDuration::from_secs(1)).await;
    assert_eq!(harness.tier("gold").await.sold, 2);
    assert_eq!(harness.ledger.all_tickets().len(), 2);
}

#[tokio::test]
async fn test_invalid_buyer_is_rejected_before_claiming() {
    let harness = venue().await;
    let reservation = reserve(&harness, &[ReservationItem::tier("gold", 1)], 300).await;

    let nameless = Buyer {
        name: "  ".into(),
        ..buyer()
    };
    let bad_email = Buyer {
        email: "asha.example.com".into(),
        ..buyer()
    };

    for candidate in [nameless, bad_email] {
        let err = harness
            .engine
            .finalizer
            .finalize(&reservation.checkout_ids(), &candidate)
            .await
            .unwrap_err();
        assert!(matches!(err, AllocError::ValidationError(_)));
    }

    let balance = harness.balance("gold").await;
    assert_eq!((balance.held, balance.sold), (1, 0));
}

#[tokio::test]
async fn test_ledger_outage_returns_claimed_hold() {
    let harness = venue().await;
    let reservation = reserve(&harness, &[ReservationItem::tier("gold", 2)], 300).await;

    harness.ledger.set_unavailable(true);
    let err = harness
        .engine
        .finalizer
        .finalize(&reservation.checkout_ids(), &buyer())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    harness.ledger.set_unavailable(false);

    assert_eq!(harness.tier("gold").await.sold, 0);
    harness.assert_balanced("gold").await;
}

#[tokio::test]
async fn test_qr_payloads_verify_against_ticket() {
    let harness = venue().await;
    let reservation = reserve(&harness, &[ReservationItem::unit("lottery", 9)], 300).await;

    let outcome = harness
        .engine
        .finalizer
        .finalize(&reservation.checkout_ids(), &buyer())
        .await
        .unwrap();
    let ticket = &outcome.issued[0];

    let claims = harness
        .engine
        .finalizer
        .signer()
        .verify(&ticket.qr_payload)
        .unwrap();
    assert_eq!(claims.ticket_id, ticket.id);
    assert_eq!(claims.order_id, reservation.order_id);
    assert_eq!(claims.unit, Some(9));

    let mut tampered = ticket.qr_payload.clone();
    tampered.push('x');
    assert!(harness.engine.finalizer.signer().verify(&tampered).is_err());
}

#[tokio::test]
async fn test_hold_claimed_by_running_finalize_is_left_alone() {
    let harness = venue().await;
    let reservation = reserve(&harness, &[ReservationItem::tier("gold", 2)], 300).await;
    let id = reservation.checkout_ids()[0];

    let running = ClaimToken::new();
    let claimed = harness.counter.claim(id, running, harness.now()).await.unwrap();
    assert!(matches!(claimed, ClaimOutcome::Claimed(_)));

    let err = harness
        .engine
        .finalizer
        .finalize(&[id], &buyer())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AllocError::DuplicateOrder {
            order_id: reservation.order_id
        }
    );

    // The claim still belongs to the running call
    assert_eq!(harness.counter.stored_holds(), 1);
    assert_eq!(harness.tier("gold").await.sold, 0);
    assert!(harness.ledger.all_tickets().is_empty());
    let order = harness
        .ledger
        .order(reservation.order_id, harness.now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.line(id).unwrap().status, LineStatus::Open);
    harness.assert_balanced("gold").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_finalize_sells_each_hold_once() {
    for _ in 0..25 {
        let harness = Arc::new(venue().await);
        let reservation = reserve(
            &harness,
            &[
                ReservationItem::tier("gold", 3),
                ReservationItem::unit("lottery", 5),
            ],
            300,
        )
        .await;
        let ids = reservation.checkout_ids();

        let calls: Vec<_> = (0..2)
            .map(|_| {
                let harness = Arc::clone(&harness);
                let ids = ids.clone();
                tokio::spawn(async move { harness.engine.finalizer.finalize(&ids, &buyer()).await })
            })
            .collect();

        let mut reported = Vec::new();
        for call in calls {
            match call.await.unwrap() {
                Ok(outcome) => {
                    assert_eq!(outcome.order_id, reservation.order_id);
                    reported.extend(outcome.issued.into_iter().map(|t| t.id));
                }
                Err(AllocError::DuplicateOrder { order_id }) => {
                    assert_eq!(order_id, reservation.order_id);
                }
                Err(other) => panic!("unexpected finalize error: {other:?}"),
            }
        }
        assert!(!reported.is_empty());

        let mut minted: Vec<_> = harness.ledger.all_tickets().into_iter().map(|t| t.id).collect();
        assert_eq!(minted.len(), 4);
        assert!(reported.iter().all(|id| minted.contains(id)));
        assert_eq!(harness.tier("gold").await.sold, 3);
        assert_eq!(harness.tier("lottery").await.sold, 1);
        assert_eq!(harness.counter.stored_holds(), 0);
        harness.assert_balanced("gold").await;
        harness.assert_balanced("lottery").await;

        let retry = harness.engine.finalizer.finalize(&ids, &buyer()).await.unwrap();
        let mut retried: Vec<_> = retry.issued.into_iter().map(|t| t.id).collect();
        retried.sort();
        minted.sort();
        assert_eq!(retried, minted);
    }
}
