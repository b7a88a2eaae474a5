//! Property tests: competing buyers never oversell a tier.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Duration;
use proptest::prelude::*;
use softlock_core::{AllocError, ReservationItem, TierId, UnitId};
use softlock_testing::properties::{competing_quantities, contested_units};
use softlock_testing::{TestHarness, buyer, session};
use std::collections::HashSet;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_concurrent_reservations_never_oversell(
        capacity in 1u32..20,
        requests in competing_quantities(24, 4),
    ) {
        let (granted, balance) = runtime().block_on(async move {
            let harness = Arc::new(
                TestHarness::builder().counted("gold", 500_000, capacity).build().await,
            );

            let mut handles = Vec::new();
            for (i, quantity) in requests.into_iter().enumerate() {
                let harness = Arc::clone(&harness);
                handles.push(tokio::spawn(async move {
                    let reservation = harness
                        .engine
                        .coordinator
                        .reserve(
                            &[ReservationItem::tier("gold", quantity)],
                            &session(&format!("s{i}")),
                            None,
                        )
                        .await;
                    match reservation {
                        Ok(reservation) => {
                            let outcome = harness
                                .engine
                                .finalizer
                                .finalize(&reservation.checkout_ids(), &buyer())
                                .await
                                .unwrap();
                            u32::try_from(outcome.issued.len()).unwrap()
                        }
                        Err(e) if e.is_contention() => 0,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }));
            }

            let mut granted = 0;
            for handle in handles {
                granted += handle.await.unwrap();
            }
            (granted, harness.balance("gold").await)
        });

        prop_assert!(granted <= capacity);
        prop_assert_eq!(balance.sold, granted);
        prop_assert!(balance.is_balanced());
    }

    #[test]
    fn prop_each_unit_has_at_most_one_holder(
        requests in contested_units(12, 30),
    ) {
        let winners = runtime().block_on(async move {
            let harness = Arc::new(
                TestHarness::builder().numbered("lottery", 10_000, 12).build().await,
            );

            let mut handles = Vec::new();
            for (i, number) in requests.into_iter().enumerate() {
                let harness = Arc::clone(&harness);
                handles.push(tokio::spawn(async move {
                    let unit = UnitId::new("lottery", number);
                    match harness
                        .engine
                        .holds
                        .acquire_unit(&unit, &session(&format!("s{i}")), Duration::minutes(5))
                        .await
                    {
                        Ok(_) => Some(number),
                        Err(AllocError::AlreadyLocked { .. }) => None,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }));
            }

            let mut winners = Vec::new();
            for handle in handles {
                if let Some(number) = handle.await.unwrap() {
                    winners.push(number);
                }
            }
            harness.assert_balanced("lottery").await;
            winners
        });

        let distinct: HashSet<u32> = winners.iter().copied().collect();
        prop_assert_eq!(distinct.len(), winners.len());
    }

    #[test]
    fn prop_reserve_then_release_restores_availability(
        quantities in competing_quantities(6, 3),
    ) {
        runtime().block_on(async move {
            let harness = TestHarness::builder().counted("gold", 500_000, 100).build().await;
            let coordinator = &harness.engine.coordinator;

            let mut reservations = Vec::new();
            for quantity in &quantities {
                reservations.push(
                    coordinator
                        .reserve(&[ReservationItem::tier("gold", *quantity)], &session("a"), None)
                        .await
                        .unwrap(),
                );
            }
            let held: u32 = quantities.iter().sum();
            assert_eq!(harness.balance("gold").await.available, 100 - held);

            for reservation in reservations {
                for checkout_id in reservation.checkout_ids() {
                    coordinator.release(checkout_id, &session("a")).await.unwrap();
                }
            }
            assert_eq!(harness.balance("gold").await.available, 100);
            assert_eq!(harness.counter.held(&TierId::new("gold")), 0);
        });
    }
}
