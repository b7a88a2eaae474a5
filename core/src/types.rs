//! Domain types for the allocation engine.
//!
//! Identifiers, tiers and units, holds, orders with their line items, and
//! minted tickets.

use crate::error::{AllocError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a priced tier (e.g. `gold`, `lottery-2025`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierId(String);

impl TierId {
    /// Create a tier id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the id is usable as a store key segment.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ValidationError`] for empty ids or ids containing
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn validate(&self) -> Result<()> {
        let valid = !self.0.is_empty()
            && self.0.len() <= 64
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if valid {
            Ok(())
        } else {
            Err(AllocError::ValidationError(format!(
                "Invalid tier id '{}'",
                self.0
            )))
        }
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TierId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An individually numbered unit of a numbered tier (e.g. lottery ticket #42).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId {
    /// Tier the unit belongs to
    pub tier: TierId,
    /// Unit number, starting at 1
    pub number: u32,
}

impl UnitId {
    /// Create a unit id.
    #[must_use]
    pub fn new(tier: impl Into<TierId>, number: u32) -> Self {
        Self {
            tier: tier.into(),
            number,
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tier, self.number)
    }
}

/// Opaque identifier of an anonymous buyer session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the id is non-empty and free of key separators.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ValidationError`] when the id is empty, longer
    /// than 128 bytes, or contains `:` or `|`.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() || self.0.len() > 128 || self.0.contains([':', '|']) {
            return Err(AllocError::ValidationError("Invalid session id".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = AllocError;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s).map(Self).map_err(|_| {
                    AllocError::ValidationError(format!(
                        "Invalid {}: {s}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

uuid_id!(
    /// Identifier returned by a successful acquire, used later to finalize.
    CheckoutId
);
uuid_id!(
    /// Unique identifier for an order
    OrderId
);
uuid_id!(
    /// Unique identifier for a minted ticket
    TicketId
);
uuid_id!(
    /// Marks which finalize call pinned a hold.
    ClaimToken
);

// ============================================================================
// Value Objects
// ============================================================================

/// Amount of money in minor currency units (paise, cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Create from minor units.
    #[must_use]
    pub const fn from_minor(amount: u64) -> Self {
        Self(amount)
    }

    /// Amount in minor units.
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Price of `quantity` items at this unit price, saturating on overflow.
    #[must_use]
    pub const fn times(&self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(quantity as u64))
    }

    /// Sum, saturating on overflow.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Tiers & Units
// ============================================================================

/// How a tier's capacity is addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// Anonymous slots sold by quantity (concert seating tiers)
    Counted,
    /// Individually numbered units `1..=total` (lottery tickets)
    Numbered,
}

impl TierKind {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Counted => "counted",
            Self::Numbered => "numbered",
        }
    }

    /// Parse from the database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known kind.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "counted" => Ok(Self::Counted),
            "numbered" => Ok(Self::Numbered),
            _ => Err(AllocError::ValidationError(format!("Invalid tier kind: {s}"))),
        }
    }
}

/// A priced category of tickets. `total` and `sold` are owned by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// Tier identifier
    pub id: TierId,
    /// Display name
    pub name: String,
    /// Optional description shown to buyers
    pub description: Option<String>,
    /// Price per unit
    pub price: Money,
    /// Counted or numbered
    pub kind: TierKind,
    /// Total capacity
    pub total: u32,
    /// Units sold (never exceeds `total`)
    pub sold: u32,
}

impl Tier {
    /// Capacity not yet sold (available plus held).
    #[must_use]
    pub const fn unsold(&self) -> u32 {
        self.total.saturating_sub(self.sold)
    }
}

/// Definition of a new tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDefinition {
    /// Tier identifier
    pub id: TierId,
    /// Display name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Price per unit
    pub price: Money,
    /// Counted or numbered
    pub kind: TierKind,
}

/// Metadata-only tier update. `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfigUpdate {
    /// New display name
    pub name: Option<String>,
    /// New price
    pub price: Option<Money>,
    /// New description
    pub description: Option<String>,
}

impl TierConfigUpdate {
    /// Returns `true` if nothing would change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.price.is_none() && self.description.is_none()
    }
}

/// Public tier listing entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAvailability {
    /// Tier identifier
    pub tier: TierId,
    /// Display name
    pub name: String,
    /// Price per unit
    pub price: Money,
    /// Total capacity
    pub total: u32,
    /// Live availability from the counter store
    pub available: u32,
}

/// Status of a numbered unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Free to acquire
    Available,
    /// Soft-locked by a hold
    Held,
    /// Sold (terminal)
    Sold,
}

// ============================================================================
// Holds
// ============================================================================

/// What a hold reserves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HoldTarget {
    /// A slice of a tier's anonymous capacity
    Tier {
        /// Tier the capacity belongs to
        tier: TierId,
        /// Number of slots held
        quantity: u32,
    },
    /// One numbered unit
    Unit(UnitId),
}

impl HoldTarget {
    /// Tier the hold draws capacity from.
    #[must_use]
    pub const fn tier(&self) -> &TierId {
        match self {
            Self::Tier { tier, .. } => tier,
            Self::Unit(unit) => &unit.tier,
        }
    }

    /// Number of slots held.
    #[must_use]
    pub const fn quantity(&self) -> u32 {
        match self {
            Self::Tier { quantity, .. } => *quantity,
            Self::Unit(_) => 1,
        }
    }

    /// Unit number for unit holds.
    #[must_use]
    pub const fn unit_number(&self) -> Option<u32> {
        match self {
            Self::Tier { .. } => None,
            Self::Unit(unit) => Some(unit.number),
        }
    }
}

/// A time-bounded claim on capacity or on one unit, owned by one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    /// Identifier used to release or finalize the hold
    pub checkout_id: CheckoutId,
    /// Owning session
    pub session_id: SessionId,
    /// Reserved capacity
    pub target: HoldTarget,
    /// When the hold was taken
    pub created_at: DateTime<Utc>,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    /// Create a hold starting at `now` and lasting `ttl`.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        target: HoldTarget,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            checkout_id: CheckoutId::new(),
            session_id,
            target,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// A hold is expired once `now > expires_at`, whether or not the store
    /// has reclaimed it yet.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left before expiry (zero once expired).
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.expires_at - now).max(chrono::Duration::zero())
    }
}

// ============================================================================
// Buyers, Orders & Tickets
// ============================================================================

/// Buyer contact details captured at finalize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    /// Full name
    pub name: String,
    /// Email address for ticket delivery
    pub email: String,
    /// Phone number
    pub phone: String,
}

impl Buyer {
    /// Validate buyer details.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ValidationError`] if the name is blank, the email
    /// is implausible, or the phone does not have 7 to 15 digits.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.name.len() > 200 {
            return Err(AllocError::ValidationError("Buyer name is required".into()));
        }

        let email_ok = match self.email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !self.email.contains(char::is_whitespace)
            }
            None => false,
        };
        if !email_ok {
            return Err(AllocError::ValidationError(format!(
                "Invalid buyer email: {}",
                self.email
            )));
        }

        let phone = self.phone.trim();
        let digits = phone.strip_prefix('+').unwrap_or(phone);
        let digit_count = digits.chars().filter(char::is_ascii_digit).count();
        let only_digits = digits
            .chars()
            .all(|c| c.is_ascii_digit() || c == ' ' || c == '-');
        if !only_digits || !(7..=15).contains(&digit_count) {
            return Err(AllocError::ValidationError(format!(
                "Invalid buyer phone: {}",
                self.phone
            )));
        }

        Ok(())
    }
}

/// Lifecycle of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Holds taken, awaiting finalize
    Pending,
    /// At least one line fulfilled
    Paid,
    /// Every line lapsed or was released, at least one lapsed
    Expired,
    /// Every line was released by the buyer
    Cancelled,
}

impl OrderStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(AllocError::ValidationError(format!("Invalid order status: {s}"))),
        }
    }
}

/// State of one order line (one hold).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    /// Hold taken, not yet finalized
    Open,
    /// Tickets minted
    Fulfilled,
    /// Hold released by the buyer
    Released,
    /// Hold expired before finalize
    Lapsed,
}

impl LineStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Fulfilled => "fulfilled",
            Self::Released => "released",
            Self::Lapsed => "lapsed",
        }
    }

    /// Parse from the database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "fulfilled" => Ok(Self::Fulfilled),
            "released" => Ok(Self::Released),
            "lapsed" => Ok(Self::Lapsed),
            _ => Err(AllocError::ValidationError(format!("Invalid line status: {s}"))),
        }
    }

    /// Lines in a closed state can no longer be fulfilled.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Released | Self::Lapsed)
    }
}

/// One order line, backed by exactly one hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Hold backing this line
    pub checkout_id: CheckoutId,
    /// Tier the line draws from
    pub tier: TierId,
    /// Unit number for numbered tiers
    pub unit_number: Option<u32>,
    /// Number of tickets
    pub quantity: u32,
    /// Unit price snapshot taken at reservation time
    pub unit_price: Money,
    /// Line state
    pub status: LineStatus,
    /// Expiry of the backing hold
    pub expires_at: DateTime<Utc>,
}

impl LineItem {
    /// Line amount.
    #[must_use]
    pub const fn amount(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    /// An open line whose hold expired before `now`.
    #[must_use]
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == LineStatus::Open && now > self.expires_at
    }
}

/// A reservation order with its line items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Session that took the holds
    pub session_id: SessionId,
    /// Buyer details (set at finalize)
    pub buyer: Option<Buyer>,
    /// Line items, one per hold
    pub lines: Vec<LineItem>,
    /// Derived order status
    pub status: OrderStatus,
    /// Amount due: fulfilled lines once paid, otherwise open lines
    pub amount: Money,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
    /// When the first line was fulfilled
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a pending order for freshly acquired holds.
    #[must_use]
    pub fn pending(session_id: SessionId, lines: Vec<LineItem>, now: DateTime<Utc>) -> Self {
        let mut order = Self {
            id: OrderId::new(),
            session_id,
            buyer: None,
            lines,
            status: OrderStatus::Pending,
            amount: Money::ZERO,
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        order.refresh();
        order
    }

    /// Derive the order status from line states.
    #[must_use]
    pub fn derive_status(lines: &[LineItem]) -> OrderStatus {
        if lines.iter().any(|l| l.status == LineStatus::Fulfilled) {
            OrderStatus::Paid
        } else if lines.iter().any(|l| l.status == LineStatus::Open) {
            OrderStatus::Pending
        } else if lines.iter().any(|l| l.status == LineStatus::Lapsed) {
            OrderStatus::Expired
        } else {
            OrderStatus::Cancelled
        }
    }

    /// Recompute status and amount after line changes.
    pub fn refresh(&mut self) {
        self.status = Self::derive_status(&self.lines);
        let counted = if self.status == OrderStatus::Paid {
            LineStatus::Fulfilled
        } else {
            LineStatus::Open
        };
        self.amount = self
            .lines
            .iter()
            .filter(|l| l.status == counted)
            .fold(Money::ZERO, |acc, l| acc.saturating_add(l.amount()));
    }

    /// Close open lines whose hold expired before `now` as lapsed.
    ///
    /// Returns `true` if any line changed.
    pub fn lapse_expired(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for line in &mut self.lines {
            if line.is_lapsed(now) {
                line.status = LineStatus::Lapsed;
                changed = true;
            }
        }
        if changed {
            self.updated_at = now;
            self.refresh();
        }
        changed
    }

    /// Line backed by the given hold.
    #[must_use]
    pub fn line(&self, checkout_id: CheckoutId) -> Option<&LineItem> {
        self.lines.iter().find(|l| l.checkout_id == checkout_id)
    }

    /// Mutable line backed by the given hold.
    pub fn line_mut(&mut self, checkout_id: CheckoutId) -> Option<&mut LineItem> {
        self.lines.iter_mut().find(|l| l.checkout_id == checkout_id)
    }
}

/// A minted ticket. Never mutated or deleted after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Tier sold
    pub tier: TierId,
    /// Unit number for numbered tiers
    pub unit_number: Option<u32>,
    /// Order the ticket was sold under
    pub order_id: OrderId,
    /// Hold the ticket was converted from
    pub checkout_id: CheckoutId,
    /// Buyer reference
    pub buyer_email: String,
    /// Signed QR payload
    pub qr_payload: String,
    /// Mint time
    pub issued_at: DateTime<Utc>,
}

// ============================================================================
// Operation Results
// ============================================================================

/// One requested item of a reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    /// Tier to reserve from
    pub tier: TierId,
    /// Specific unit number (numbered tiers only)
    pub unit: Option<u32>,
    /// Quantity (must be 1 for unit items)
    pub quantity: u32,
}

impl ReservationItem {
    /// Item reserving `quantity` anonymous slots of a tier.
    #[must_use]
    pub fn tier(tier: impl Into<TierId>, quantity: u32) -> Self {
        Self {
            tier: tier.into(),
            unit: None,
            quantity,
        }
    }

    /// Item reserving one numbered unit.
    #[must_use]
    pub fn unit(tier: impl Into<TierId>, number: u32) -> Self {
        Self {
            tier: tier.into(),
            unit: Some(number),
            quantity: 1,
        }
    }
}

/// Result of a successful reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Pending order backing the holds
    pub order_id: OrderId,
    /// Acquired holds, in request order
    pub holds: Vec<Hold>,
    /// Earliest expiry among the holds
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Checkout ids of all holds, in request order.
    #[must_use]
    pub fn checkout_ids(&self) -> Vec<CheckoutId> {
        self.holds.iter().map(|h| h.checkout_id).collect()
    }
}

/// Result of a finalize batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    /// Order of the first issued ticket
    pub order_id: OrderId,
    /// Tickets issued by this call or by an earlier identical call
    pub issued: Vec<Ticket>,
    /// Checkout ids that were invalid, expired, or already closed
    pub skipped: Vec<CheckoutId>,
}

/// Result of an admin capacity change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustOutcome {
    /// Tier adjusted
    pub tier: TierId,
    /// Live availability after the change
    pub new_available: u32,
    /// Ledger total after the change
    pub new_total: u32,
    /// Set when the counter store could not be brought in line with the ledger
    pub warning: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn line(status: LineStatus, qty: u32) -> LineItem {
        LineItem {
            checkout_id: CheckoutId::new(),
            tier: TierId::new("gold"),
            unit_number: None,
            quantity: qty,
            unit_price: Money::from_minor(500),
            status,
            expires_at: DateTime::<Utc>::from_timestamp(1_735_689_900, 0).unwrap(),
        }
    }

    #[test]
    fn test_order_status_is_derived_from_lines() {
        use LineStatus::{Fulfilled, Lapsed, Open, Released};

        assert_eq!(Order::derive_status(&[line(Open, 1)]), OrderStatus::Pending);
        assert_eq!(
            Order::derive_status(&[line(Fulfilled, 1), line(Lapsed, 1)]),
            OrderStatus::Paid
        );
        assert_eq!(
            Order::derive_status(&[line(Released, 1), line(Lapsed, 1)]),
            OrderStatus::Expired
        );
        assert_eq!(
            Order::derive_status(&[line(Released, 1), line(Released, 2)]),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn test_paid_amount_counts_fulfilled_lines_only() {
        let mut order = Order::pending(
            SessionId::new("s1"),
            vec![line(LineStatus::Open, 2), line(LineStatus::Open, 1)],
            Utc::now(),
        );
        assert_eq!(order.amount, Money::from_minor(1500));

        order.lines[0].status = LineStatus::Fulfilled;
        order.lines[1].status = LineStatus::Lapsed;
        order.refresh();

        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.amount, Money::from_minor(1000));
    }

    #[test]
    fn test_lapse_expired_closes_only_open_lines_past_expiry() {
        let mut order = Order::pending(
            SessionId::new("s1"),
            vec![line(LineStatus::Open, 1), line(LineStatus::Released, 1)],
            Utc::now(),
        );
        let expires_at = order.lines[0].expires_at;

        assert!(!order.lapse_expired(expires_at));
        assert_eq!(order.status, OrderStatus::Pending);

        let later = expires_at + chrono::Duration::seconds(1);
        assert!(order.lapse_expired(later));
        assert_eq!(order.lines[0].status, LineStatus::Lapsed);
        assert_eq!(order.lines[1].status, LineStatus::Released);
        assert_eq!(order.status, OrderStatus::Expired);
        assert_eq!(order.updated_at, later);
        assert!(!order.lapse_expired(later));
    }

    #[test]
    fn test_hold_expiry_is_strictly_after_expires_at() {
        let now = Utc::now();
        let hold = Hold::new(
            SessionId::new("s1"),
            HoldTarget::Tier {
                tier: TierId::new("gold"),
                quantity: 1,
            },
            now,
            chrono::Duration::seconds(5),
        );

        assert!(!hold.is_expired(hold.expires_at));
        assert!(hold.is_expired(hold.expires_at + chrono::Duration::milliseconds(1)));
        assert_eq!(hold.remaining(now + chrono::Duration::seconds(10)), chrono::Duration::zero());
    }

    #[test]
    fn test_buyer_validation() {
        let buyer = Buyer {
            name: "Asha Rao".into(),
            email: "asha@example.com".into(),
            phone: "+91 98765 43210".into(),
        };
        assert!(buyer.validate().is_ok());

        let bad_email = Buyer {
            email: "asha@example".into(),
            ..buyer.clone()
        };
        assert!(matches!(bad_email.validate(), Err(AllocError::ValidationError(_))));

        let bad_phone = Buyer {
            phone: "12ab".into(),
            ..buyer
        };
        assert!(matches!(bad_phone.validate(), Err(AllocError::ValidationError(_))));
    }

    #[test]
    fn test_tier_id_validation() {
        assert!(TierId::new("gold-vip_2").validate().is_ok());
        assert!(TierId::new("").validate().is_err());
        assert!(TierId::new("gold:1").validate().is_err());
    }

    #[test]
    fn test_checkout_id_parses_from_string() {
        let id = CheckoutId::new();
        let parsed: CheckoutId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<CheckoutId>().is_err());
    }
}
