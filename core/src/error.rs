//! Error types for reservation, fulfillment and admin operations.

use crate::types::{CheckoutId, OrderId, TierId, UnitId};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AllocError>;

/// Error taxonomy for the allocation engine.
///
/// Inventory and validation errors are returned to the caller for display and
/// are never retried inside the engine. Only [`AllocError::StoreUnavailable`]
/// describes a transient fault.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AllocError {
    // ═══════════════════════════════════════════════════════════
    // Inventory Errors
    // ═══════════════════════════════════════════════════════════

    /// Not enough live capacity at acquire time.
    #[error("Insufficient inventory for tier {tier}: requested {requested}, available {available}")]
    InsufficientInventory {
        /// Tier that ran short
        tier: TierId,
        /// Quantity requested
        requested: u32,
        /// Live availability observed by the failed acquire
        available: u32,
    },

    /// Unit is held by another session or already sold.
    #[error("Unit {unit} is already locked")]
    AlreadyLocked {
        /// The contested unit
        unit: UnitId,
    },

    /// Hold belongs to a different session.
    #[error("Hold {checkout_id} is owned by another session")]
    HoldNotOwned {
        /// The hold that was addressed
        checkout_id: CheckoutId,
    },

    /// Every hold of a finalize request had lapsed.
    #[error("Reservation expired, no tickets issued")]
    HoldExpired,

    /// Finalize retried on an order line that was already paid, or that a
    /// concurrent finalize is paying for right now.
    ///
    /// The finalizer reports paid lines as issued and only returns this when
    /// a concurrent call left it nothing to issue. Retrying then reports the
    /// tickets that call minted.
    #[error("Order {order_id} has already been paid")]
    DuplicateOrder {
        /// The paid order
        order_id: OrderId,
    },

    /// Tier is not defined in the ledger or the counter store.
    #[error("Unknown tier: {0}")]
    UnknownTier(TierId),

    // ═══════════════════════════════════════════════════════════
    // Admin Errors
    // ═══════════════════════════════════════════════════════════

    /// Capacity change conflicts with live state.
    #[error("Admin conflict on tier {tier}: {reason}")]
    AdminConflict {
        /// Tier being adjusted
        tier: TierId,
        /// Why the change was refused
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Request Errors
    // ═══════════════════════════════════════════════════════════

    /// Malformed request.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Client exceeded its request budget.
    #[error("Too many requests, please retry after {retry_after:?}")]
    RateLimited {
        /// Duration to wait before retrying
        retry_after: std::time::Duration,
    },

    /// A multi-item reservation failed and was rolled back.
    #[error("Reservation failed at item {index}: {source}")]
    ReservationFailed {
        /// Zero-based index of the item that failed
        index: usize,
        /// The underlying failure
        source: Box<AllocError>,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Counter store or ledger could not be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AllocError {
    /// Returns `true` if retrying the same call later may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// # use softlock_core::AllocError;
    /// assert!(AllocError::StoreUnavailable("redis".into()).is_retryable());
    /// assert!(!AllocError::HoldExpired.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Returns `true` if this error reports a lack of capacity or a lock held
    /// elsewhere, including when wrapped by a failed reservation.
    #[must_use]
    pub fn is_contention(&self) -> bool {
        match self {
            Self::InsufficientInventory { .. } | Self::AlreadyLocked { .. } => true,
            Self::ReservationFailed { source, .. } => source.is_contention(),
            _ => false,
        }
    }

    /// The innermost error, unwrapping reservation rollbacks.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::ReservationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AllocError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(format!("Ledger error: {err}"))
    }
}

impl From<redis::RedisError> for AllocError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable(format!("Counter store error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_failed_unwraps_to_root_cause() {
        let inner = AllocError::InsufficientInventory {
            tier: TierId::new("gold"),
            requested: 2,
            available: 1,
        };
        let err = AllocError::ReservationFailed {
            index: 1,
            source: Box::new(inner.clone()),
        };

        assert_eq!(err.root_cause(), &inner);
        assert!(err.is_contention());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_expired_message_matches_terminal_wording() {
        assert_eq!(
            AllocError::HoldExpired.to_string(),
            "Reservation expired, no tickets issued"
        );
    }
}
