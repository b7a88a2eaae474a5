//! Admin capacity and configuration changes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Duration;
use softlock_core::providers::{ClaimOutcome, CounterStore, Ledger};
use softlock_core::{
    AllocError, ClaimToken, LineStatus, Money, OrderStatus, ReservationItem, TierConfigUpdate,
    TierDefinition, TierId, TierKind, UnitId,
};
use softlock_testing::{TestHarness, buyer, session};

fn gold() -> TierId {
    TierId::new("gold")
}

async fn hold_gold(harness: &TestHarness, quantity: u32) {
    harness
        .engine
        .holds
        .acquire_tier(&gold(), quantity, &session("a"), Duration::minutes(5))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_add_and_remove_respect_held_capacity() {
    let harness = TestHarness::builder().counted("gold", 500_000, 10).build().await;
    let admin = &harness.engine.admin;
    hold_gold(&harness, 6).await;

    let added = admin.add(&gold(), 5).await.unwrap();
    assert_eq!((added.new_available, added.new_total), (9, 15));
    assert!(added.warning.is_none());

    let err = admin.remove(&gold(), 10).await.unwrap_err();
    assert!(matches!(err, AllocError::AdminConflict { .. }));
    let unchanged = harness.balance("gold").await;
    assert_eq!((unchanged.available, unchanged.total), (9, 15));

    let removed = admin.remove(&gold(), 9).await.unwrap();
    assert_eq!((removed.new_available, removed.new_total), (0, 6));
    harness.assert_balanced("gold").await;
}

#[tokio::test]
async fn test_non_positive_quantities_are_rejected() {
    let harness = TestHarness::builder().counted("gold", 500_000, 10).build().await;
    let admin = &harness.engine.admin;

    for quantity in [0, -3] {
        assert!(matches!(
            admin.add(&gold(), quantity).await.unwrap_err(),
            AllocError::ValidationError(_)
        ));
        assert!(matches!(
            admin.remove(&gold(), quantity).await.unwrap_err(),
            AllocError::ValidationError(_)
        ));
    }
    assert_eq!(harness.tier("gold").await.total, 10);
}

#[tokio::test]
async fn test_add_with_counter_down_warns_and_reports_ledger_view() {
    let harness = TestHarness::builder().counted("gold", 500_000, 10).build().await;
    hold_gold(&harness, 2).await;

    harness.counter.set_unavailable(true);
    let outcome = harness.engine.admin.add(&gold(), 5).await.unwrap();
    harness.counter.set_unavailable(false);

    assert_eq!(outcome.new_total, 15);
    assert_eq!(outcome.new_available, 15);
    assert!(outcome.warning.unwrap().contains("reconcile"));

    // The counter still says 8; reconcile brings it in line
    assert_eq!(harness.counter.raw_available(&gold()), Some(8));
    let reconciled = harness.engine.admin.reconcile(&gold()).await.unwrap();
    assert_eq!(reconciled.new_available, 13);
    harness.assert_balanced("gold").await;
}

#[tokio::test]
async fn test_initialize_rejects_negative_and_below_sold() {
    let harness = TestHarness::builder().counted("gold", 500_000, 10).build().await;
    let reservation = harness
        .engine
        .coordinator
        .reserve(&[ReservationItem::tier("gold", 4)], &session("a"), None)
        .await
        .unwrap();
    harness
        .engine
        .finalizer
        .finalize(&reservation.checkout_ids(), &buyer())
        .await
        .unwrap();

    let admin = &harness.engine.admin;
    assert!(matches!(
        admin.initialize(&gold(), -1).await.unwrap_err(),
        AllocError::ValidationError(_)
    ));
    assert!(matches!(
        admin.initialize(&gold(), 3).await.unwrap_err(),
        AllocError::AdminConflict { .. }
    ));

    let outcome = admin.initialize(&gold(), 4).await.unwrap();
    assert_eq!((outcome.new_total, outcome.new_available), (4, 0));
    harness.assert_balanced("gold").await;
}

#[tokio::test]
async fn test_initialize_keeps_live_holds() {
    let harness = TestHarness::builder().counted("gold", 500_000, 10).build().await;
    hold_gold(&harness, 3).await;

    let outcome = harness.engine.admin.initialize(&gold(), 20).await.unwrap();
    assert_eq!(outcome.new_available, 17);
    harness.assert_balanced("gold").await;
}

#[tokio::test]
async fn test_unknown_tier_is_reported() {
    let harness = TestHarness::builder().build().await;
    let platinum = TierId::new("platinum");
    let admin = &harness.engine.admin;

    assert_eq!(
        admin.add(&platinum, 1).await.unwrap_err(),
        AllocError::UnknownTier(platinum.clone())
    );
    assert_eq!(
        admin.reconcile(&platinum).await.unwrap_err(),
        AllocError::UnknownTier(platinum.clone())
    );
}

#[tokio::test]
async fn test_define_tier_rejects_duplicates_and_blank_names() {
    let harness = TestHarness::builder().counted("gold", 500_000, 10).build().await;
    let admin = &harness.engine.admin;

    let mut definition = TierDefinition {
        id: gold(),
        name: "Gold again".into(),
        description: None,
        price: Money::from_minor(1),
        kind: TierKind::Counted,
    };
    assert!(matches!(
        admin.define_tier(&definition).await.unwrap_err(),
        AllocError::AdminConflict { .. }
    ));

    definition.id = TierId::new("silver");
    definition.name = " ".into();
    assert!(matches!(
        admin.define_tier(&definition).await.unwrap_err(),
        AllocError::ValidationError(_)
    ));

    definition.name = "Silver".into();
    let silver = admin.define_tier(&definition).await.unwrap();
    assert_eq!((silver.total, silver.sold), (0, 0));
    assert_eq!(harness.balance("silver").await.available, 0);
}

#[tokio::test]
async fn test_update_tier_config_changes_metadata_only() {
    let harness = TestHarness::builder().counted("gold", 500_000, 10).build().await;
    let admin = &harness.engine.admin;

    assert!(matches!(
        admin
            .update_tier_config(&gold(), &TierConfigUpdate::default())
            .await
            .unwrap_err(),
        AllocError::ValidationError(_)
    ));
    assert!(matches!(
        admin
            .update_tier_config(
                &gold(),
                &TierConfigUpdate {
                    name: Some(String::new()),
                    ..TierConfigUpdate::default()
                }
            )
            .await
            .unwrap_err(),
        AllocError::ValidationError(_)
    ));

    let updated = admin
        .update_tier_config(
            &gold(),
            &TierConfigUpdate {
                price: Some(Money::from_minor(450_000)),
                description: Some("Front rows".into()),
                ..TierConfigUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.price, Money::from_minor(450_000));
    assert_eq!(updated.name, "Gold");
    assert_eq!(updated.description.as_deref(), Some("Front rows"));
    assert_eq!(updated.total, 10);
}

#[tokio::test]
async fn test_remove_refuses_to_drop_held_units() {
    let harness = TestHarness::builder().numbered("lottery", 10_000, 10).build().await;
    harness
        .engine
        .holds
        .acquire_unit(&UnitId::new("lottery", 10), &session("a"), Duration::minutes(5))
        .await
        .unwrap();

    let lottery = TierId::new("lottery");
    let err = harness.engine.admin.remove(&lottery, 2).await.unwrap_err();
    assert!(matches!(err, AllocError::AdminConflict { .. }));
    assert_eq!(harness.tier("lottery").await.total, 10);
    harness.assert_balanced("lottery").await;
}

#[tokio::test]
async fn test_reconcile_returns_stale_claims_after_grace() {
    let harness = TestHarness::builder().counted("gold", 500_000, 10).build().await;
    let reservation = harness
        .engine
        .coordinator
        .reserve(
            &[ReservationItem::tier("gold", 3)],
            &session("a"),
            Some(Duration::seconds(30)),
        )
        .await
        .unwrap();

    // A finalize that claimed the hold and never came back
    let claimed = harness
        .counter
        .claim(reservation.checkout_ids()[0], ClaimToken::new(), harness.now())
        .await
        .unwrap();
    assert!(matches!(claimed, ClaimOutcome::Claimed(_)));

    harness.advance(31);
    let early = harness.engine.admin.reconcile(&gold()).await.unwrap();
    assert_eq!(early.new_available, 7);

    harness.advance(60);
    let late = harness.engine.admin.reconcile(&gold()).await.unwrap();
    assert_eq!(late.new_available, 10);
    assert_eq!(harness.counter.stored_holds(), 0);
    harness.assert_balanced("gold").await;
}

#[tokio::test]
async fn test_reconcile_closes_lines_of_expired_holds() {
    let harness = TestHarness::builder().counted("gold", 500_000, 10).build().await;
    let reserved_at = harness.now();
    let reservation = harness
        .engine
        .coordinator
        .reserve(&[ReservationItem::tier("gold", 2)], &session("a"), None)
        .await
        .unwrap();

    harness.advance(6 * 60);
    let outcome = harness.engine.admin.reconcile(&gold()).await.unwrap();
    assert_eq!(outcome.new_available, 10);

    // Read as of reservation time: the lapse was written, not derived
    let order = harness
        .ledger
        .order(reservation.order_id, reserved_at)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Expired);
    assert!(order.lines.iter().all(|l| l.status == LineStatus::Lapsed));
    harness.assert_balanced("gold").await;
}

#[tokio::test]
async fn test_list_tiers_reports_live_availability() {
    let harness = TestHarness::builder()
        .counted("gold", 500_000, 10)
        .numbered("lottery", 10_000, 100)
        .build()
        .await;
    hold_gold(&harness, 4).await;

    let mut listing = harness.engine.admin.list_tiers().await.unwrap();
    listing.sort_by(|a, b| a.tier.as_str().cmp(b.tier.as_str()));

    assert_eq!(listing.len(), 2);
    assert_eq!((listing[0].tier.as_str(), listing[0].available), ("gold", 6));
    assert_eq!((listing[1].tier.as_str(), listing[1].available), ("lottery", 100));
    assert_eq!(listing[0].price, Money::from_minor(500_000));
}
