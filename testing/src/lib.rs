//! # Softlock Testing
//!
//! Testing utilities for the Softlock reservation engine.
//!
//! This crate provides:
//! - [`TestHarness`]: a fully wired engine over the in-memory stores
//! - Deterministic clocks and fixture helpers
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use softlock_core::ReservationItem;
//! use softlock_testing::{TestHarness, session};
//!
//! # tokio_test::block_on(async {
//! let harness = TestHarness::builder().counted("gold", 500_000, 50).build().await;
//!
//! let reservation = harness
//!     .engine
//!     .coordinator
//!     .reserve(&[ReservationItem::tier("gold", 2)], &session("s-1"), None)
//!     .await
//!     .unwrap();
//! assert_eq!(reservation.holds.len(), 1);
//! harness.assert_balanced("gold").await;
//! # });
//! ```

pub mod harness;

/// Deterministic clocks.
pub mod mocks {
    use softlock_core::mocks::ManualClock;

    /// Manual clock for tests, starting at 2025-01-01 00:00:00 UTC.
    ///
    /// # Example
    ///
    /// ```
    /// use softlock_testing::test_clock;
    /// use softlock_core::Clock;
    ///
    /// let clock = test_clock();
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Only moves when advanced
    /// ```
    #[must_use]
    pub fn test_clock() -> ManualClock {
        ManualClock::default()
    }
}

/// Fixture helpers.
pub mod helpers {
    use softlock_core::{Buyer, SessionId};

    /// A session id.
    #[must_use]
    pub fn session(id: &str) -> SessionId {
        SessionId::new(id)
    }

    /// Valid buyer details.
    #[must_use]
    pub fn buyer() -> Buyer {
        Buyer {
            name: "Asha Rao".into(),
            email: "asha@example.com".into(),
            phone: "+91 98000 00000".into(),
        }
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Competing requests against one tier: each entry is the quantity one
    /// buyer asks for.
    pub fn competing_quantities(
        max_buyers: usize,
        max_quantity: u32,
    ) -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(1..=max_quantity, 1..=max_buyers)
    }

    /// Unit numbers requested by competing buyers, duplicates included.
    pub fn contested_units(units: u32, max_buyers: usize) -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(1..=units, 1..=max_buyers)
    }
}

// Re-export commonly used items
pub use harness::{HarnessBuilder, InventoryBalance, TEST_QR_SECRET, TestHarness};
pub use helpers::{buyer, session};
pub use mocks::test_clock;

#[cfg(test)]
mod tests {
    use super::*;
    use softlock_core::Clock;

    #[test]
    fn test_clock_is_fixed_until_advanced() {
        let clock = test_clock();
        let time1 = clock.now();
        assert_eq!(time1, clock.now());

        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now() - time1, chrono::Duration::seconds(5));
    }

    #[test]
    fn test_fixture_buyer_is_valid() {
        assert!(buyer().validate().is_ok());
    }
}
