//! Reservation saga: all-or-nothing acquisition and pending orders.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Duration;
use softlock_core::providers::Ledger;
use softlock_core::{
    AllocError, LineStatus, Money, OrderStatus, ReservationItem, TierId, UnitId,
};
use softlock_testing::{TestHarness, session};

async fn venue() -> TestHarness {
    TestHarness::builder()
        .counted("gold", 500_000, 10)
        .counted("silver", 200_000, 2)
        .numbered("lottery", 10_000, 100)
        .build()
        .await
}

#[tokio::test]
async fn test_reservation_creates_pending_order_with_price_snapshot() {
    let harness = venue().await;

    let reservation = harness
        .engine
        .coordinator
        .reserve(
            &[
                ReservationItem::tier("gold", 2),
                ReservationItem::unit("lottery", 7),
            ],
            &session("a"),
            None,
        )
        .await
        .unwrap();

    assert_eq!(reservation.holds.len(), 2);
    assert_eq!(reservation.expires_at, harness.now() + Duration::minutes(5));

    let order = harness
        .ledger
        .order(reservation.order_id, harness.now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.amount, Money::from_minor(2 * 500_000 + 10_000));
    assert_eq!(order.lines.len(), 2);
    assert_eq!(order.lines[0].checkout_id, reservation.holds[0].checkout_id);
    assert_eq!(order.lines[1].unit_number, Some(7));
    assert!(order.lines.iter().all(|l| l.status == LineStatus::Open));

    harness.assert_balanced("gold").await;
    harness.assert_balanced("lottery").await;
}

#[tokio::test]
async fn test_failed_item_rolls_back_everything_acquired_before_it() {
    let harness = venue().await;

    let err = harness
        .engine
        .coordinator
        .reserve(
            &[
                ReservationItem::tier("gold", 3),
                ReservationItem::unit("lottery", 42),
                ReservationItem::tier("silver", 5),
            ],
            &session("a"),
            None,
        )
        .await
        .unwrap_err();

    match err {
        AllocError::ReservationFailed { index, source } => {
            assert_eq!(index, 2);
            assert!(matches!(*source, AllocError::InsufficientInventory { available: 2, .. }));
        }
        other => panic!("expected ReservationFailed, got {other:?}"),
    }

    assert_eq!(harness.balance("gold").await.available, 10);
    assert_eq!(harness.balance("lottery").await.available, 100);
    assert!(
        harness
            .engine
            .holds
            .list_mine(&session("a"))
            .await
            .unwrap()
            .is_empty()
    );

    // Unit 42 is free again for someone else
    harness
        .engine
        .holds
        .acquire_unit(&UnitId::new("lottery", 42), &session("b"), Duration::minutes(5))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_locked_unit_names_failing_item() {
    let harness = venue().await;
    harness
        .engine
        .holds
        .acquire_unit(&UnitId::new("lottery", 42), &session("b"), Duration::minutes(5))
        .await
        .unwrap();

    let err = harness
        .engine
        .coordinator
        .reserve(
            &[
                ReservationItem::tier("gold", 1),
                ReservationItem::unit("lottery", 42),
            ],
            &session("a"),
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(
        err.root_cause(),
        &AllocError::AlreadyLocked {
            unit: UnitId::new("lottery", 42)
        }
    );
    assert_eq!(harness.balance("gold").await.available, 10);
}

#[tokio::test]
async fn test_malformed_requests_acquire_nothing() {
    let harness = venue().await;
    let coordinator = &harness.engine.coordinator;

    let empty = coordinator.reserve(&[], &session("a"), None).await.unwrap_err();
    assert!(matches!(empty, AllocError::ValidationError(_)));

    let zero = coordinator
        .reserve(&[ReservationItem::tier("gold", 0)], &session("a"), None)
        .await
        .unwrap_err();
    assert!(matches!(zero.root_cause(), AllocError::ValidationError(_)));

    let unit_on_counted = coordinator
        .reserve(&[ReservationItem::unit("gold", 1)], &session("a"), None)
        .await
        .unwrap_err();
    assert!(matches!(unit_on_counted.root_cause(), AllocError::ValidationError(_)));

    let unknown = coordinator
        .reserve(&[ReservationItem::tier("platinum", 1)], &session("a"), None)
        .await
        .unwrap_err();
    assert_eq!(
        unknown.root_cause(),
        &AllocError::UnknownTier(TierId::new("platinum"))
    );

    let duplicate_unit = coordinator
        .reserve(
            &[
                ReservationItem::unit("lottery", 5),
                ReservationItem::unit("lottery", 5),
            ],
            &session("a"),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(duplicate_unit.root_cause(), AllocError::ValidationError(_)));

    assert_eq!(harness.balance("gold").await.available, 10);
    assert_eq!(harness.balance("lottery").await.available, 100);
}

#[tokio::test]
async fn test_ledger_outage_releases_acquired_holds() {
    let harness = venue().await;
    harness.ledger.set_unavailable(true);

    let err = harness
        .engine
        .coordinator
        .reserve(&[ReservationItem::tier("gold", 4)], &session("a"), None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    harness.ledger.set_unavailable(false);
    assert_eq!(harness.balance("gold").await.available, 10);
    assert_eq!(harness.counter.stored_holds(), 0);
}

#[tokio::test]
async fn test_release_closes_line_and_cancels_order() {
    let harness = venue().await;
    let reservation = harness
        .engine
        .coordinator
        .reserve(
            &[
                ReservationItem::tier("gold", 1),
                ReservationItem::tier("silver", 1),
            ],
            &session("a"),
            None,
        )
        .await
        .unwrap();
    let ids = reservation.checkout_ids();

    let coordinator = &harness.engine.coordinator;
    let err = coordinator.release(ids[0], &session("b")).await.unwrap_err();
    assert_eq!(err, AllocError::HoldNotOwned { checkout_id: ids[0] });

    coordinator.release(ids[0], &session("a")).await.unwrap();
    let order = harness.ledger.order(reservation.order_id, harness.now()).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.amount, Money::from_minor(200_000));

    coordinator.release(ids[1], &session("a")).await.unwrap();
    coordinator.release(ids[1], &session("a")).await.unwrap();
    let order = harness.ledger.order(reservation.order_id, harness.now()).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    harness.assert_balanced("gold").await;
    harness.assert_balanced("silver").await;
}

#[tokio::test]
async fn test_ttl_override_sets_earliest_expiry() {
    let harness = venue().await;
    let reservation = harness
        .engine
        .coordinator
        .reserve(
            &[ReservationItem::tier("gold", 1)],
            &session("a"),
            Some(Duration::seconds(5)),
        )
        .await
        .unwrap();

    assert_eq!(reservation.expires_at, harness.now() + Duration::seconds(5));
}

#[tokio::test]
async fn test_unread_order_reads_expired_once_its_holds_lapse() {
    let harness = venue().await;
    let coordinator = &harness.engine.coordinator;
    let first = coordinator
        .reserve(&[ReservationItem::tier("silver", 2)], &session("a"), None)
        .await
        .unwrap();

    harness.advance(6 * 60);
    let second = coordinator
        .reserve(&[ReservationItem::tier("silver", 2)], &session("b"), None)
        .await
        .unwrap();

    let order = coordinator.order(first.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Expired);
    assert!(order.lines.iter().all(|l| l.status == LineStatus::Lapsed));

    let taken = coordinator.order(second.order_id).await.unwrap().unwrap();
    assert_eq!(taken.status, OrderStatus::Pending);
    harness.assert_balanced("silver").await;
}

#[tokio::test]
async fn test_order_stays_pending_until_hold_expiry() {
    let harness = venue().await;
    let reservation = harness
        .engine
        .coordinator
        .reserve(&[ReservationItem::tier("gold", 1)], &session("a"), None)
        .await
        .unwrap();

    harness.advance(5 * 60);
    let order = harness
        .engine
        .coordinator
        .order(reservation.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    harness.advance(1);
    let order = harness
        .ledger
        .order(reservation.order_id, harness.now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Expired);
}

#[tokio::test]
async fn test_unit_already_held_by_session_is_reserved_with_its_hold() {
    let harness = venue().await;
    let hold = harness
        .engine
        .holds
        .acquire_unit(&UnitId::new("lottery", 42), &session("a"), Duration::minutes(5))
        .await
        .unwrap();

    let reservation = harness
        .engine
        .coordinator
        .reserve(&[ReservationItem::unit("lottery", 42)], &session("a"), None)
        .await
        .unwrap();

    assert_eq!(reservation.checkout_ids(), vec![hold.checkout_id]);
    let order = harness
        .ledger
        .order(reservation.order_id, harness.now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].checkout_id, hold.checkout_id);
    assert_eq!(harness.balance("lottery").await.available, 99);
    harness.assert_balanced("lottery").await;
}

#[tokio::test]
async fn test_resubmitted_basket_returns_existing_order() {
    let harness = venue().await;
    let coordinator = &harness.engine.coordinator;
    let basket = [
        ReservationItem::unit("lottery", 7),
        ReservationItem::unit("lottery", 8),
    ];

    let first = coordinator.reserve(&basket, &session("a"), None).await.unwrap();
    harness.advance(30);
    let again = coordinator.reserve(&basket, &session("a"), None).await.unwrap();

    assert_eq!(again.order_id, first.order_id);
    assert_eq!(again.checkout_ids(), first.checkout_ids());
    assert_eq!(again.expires_at, first.expires_at);
    assert_eq!(harness.balance("lottery").await.available, 98);

    // A new item next to a held unit gets its own order line
    let mixed = coordinator
        .reserve(
            &[
                ReservationItem::unit("lottery", 7),
                ReservationItem::tier("gold", 1),
            ],
            &session("a"),
            None,
        )
        .await
        .unwrap();
    assert_ne!(mixed.order_id, first.order_id);
    assert_eq!(mixed.holds.len(), 2);
    let order = harness
        .ledger
        .order(mixed.order_id, harness.now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].tier, TierId::new("gold"));

    // Another session still cannot take the unit
    let err = coordinator
        .reserve(&[ReservationItem::unit("lottery", 7)], &session("b"), None)
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), AllocError::AlreadyLocked { .. }));

    harness.assert_balanced("lottery").await;
    harness.assert_balanced("gold").await;
}
