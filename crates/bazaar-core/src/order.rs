//! # Order Lifecycle
//!
//! "Order first, bill later" workflow for table/room service.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   pending ──► preparing ──► ready ──► served                           │
//! │      │            │           │  \        │                             │
//! │      │            │           │   \       │                             │
//! │      ▼            ▼           ▼    ▼      ▼                             │
//! │   cancelled   cancelled   cancelled billed (terminal)                   │
//! │                                                                         │
//! │   Forward steps are adjacency-only (no skipping); `cancelled` is        │
//! │   reachable from any non-terminal state; `billed` and `cancelled`       │
//! │   accept no further transitions or item additions.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Whether an order may be billed before it is `ready` varies by venue
//! (counter service bills from `pending`, table service waits), so billing
//! eligibility is a [`BillingPolicy`], not a hardcoded edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cart::SaleTotals;
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Station, TaxRate};

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle status of a service order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed, not yet picked up by the kitchen.
    Pending,
    /// Kitchen/bar is working on it.
    Preparing,
    /// Ready for pickup/delivery to the guest.
    Ready,
    /// Delivered to the guest.
    Served,
    /// Billed into an invoice. Terminal.
    Billed,
    /// Cancelled before billing. Terminal.
    Cancelled,
}

impl OrderStatus {
    /// Stable lowercase label (matches the persisted representation).
    pub const fn label(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Served => "served",
            OrderStatus::Billed => "billed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Billed and cancelled orders accept no further changes.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Billed | OrderStatus::Cancelled)
    }

    /// Extra items may be appended at any time before billing/cancellation.
    #[inline]
    pub const fn accepts_items(&self) -> bool {
        !self.is_terminal()
    }

    /// Checks a single transition against the adjacency table.
    ///
    /// Kitchen progress is forward-only with no skipping; any non-terminal
    /// order can cancel. Same-status "transitions" are rejected: statuses
    /// move monotonically and a repeat means two writers raced (the storage
    /// layer's guarded update catches that case).
    ///
    /// Billing from `ready`/`served` is the machine's base rule; whether
    /// earlier statuses may bill is a [`BillingPolicy`] decision layered on
    /// top by the billing path.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        if *self == to {
            return false;
        }

        match (*self, to) {
            // Kitchen forward chain
            (OrderStatus::Pending, OrderStatus::Preparing) => true,
            (OrderStatus::Preparing, OrderStatus::Ready) => true,
            (OrderStatus::Ready, OrderStatus::Served) => true,

            // Billing
            (OrderStatus::Ready, OrderStatus::Billed) => true,
            (OrderStatus::Served, OrderStatus::Billed) => true,

            // Cancellation from any non-terminal state
            (from, OrderStatus::Cancelled) => !from.is_terminal(),

            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Billing Policy
// =============================================================================

/// Venue policy for when an order becomes billable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BillingPolicy {
    /// Bill only once the kitchen is done: `ready` or `served`.
    #[default]
    ReadyRequired,
    /// Bill any active order, including `pending`/`preparing`
    /// (counter-service venues that settle up front).
    AnyActive,
}

impl BillingPolicy {
    /// Checks whether an order in `status` may be billed under this policy.
    pub fn may_bill(&self, status: OrderStatus) -> bool {
        match self {
            BillingPolicy::ReadyRequired => {
                matches!(status, OrderStatus::Ready | OrderStatus::Served)
            }
            BillingPolicy::AnyActive => !status.is_terminal(),
        }
    }
}

// =============================================================================
// Service Context
// =============================================================================

/// Where an order is being served: a table, a room/booking, or a walk-in.
/// Exactly one context applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "ref")]
pub enum ServiceContext {
    /// Dine-in table number.
    Table(String),
    /// Room/booking reference for in-room service.
    Room(String),
    /// Counter sale with no table or room.
    WalkIn,
}

impl ServiceContext {
    /// Table number, when dine-in.
    pub fn table_number(&self) -> Option<&str> {
        match self {
            ServiceContext::Table(n) => Some(n),
            _ => None,
        }
    }

    /// Room/booking reference, when in-room.
    pub fn room_ref(&self) -> Option<&str> {
        match self {
            ServiceContext::Room(r) => Some(r),
            _ => None,
        }
    }

    /// Rebuilds the context from the two nullable storage columns.
    /// A row with both set is treated as a table order (tables win; the
    /// storage layer never writes both).
    pub fn from_columns(table_number: Option<String>, room_ref: Option<String>) -> Self {
        match (table_number, room_ref) {
            (Some(t), _) => ServiceContext::Table(t),
            (None, Some(r)) => ServiceContext::Room(r),
            (None, None) => ServiceContext::WalkIn,
        }
    }
}

impl fmt::Display for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceContext::Table(n) => write!(f, "Table {n}"),
            ServiceContext::Room(r) => write!(f, "Room {r}"),
            ServiceContext::WalkIn => f.write_str("Walk-in"),
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// A service order owned by a waiter session until billed or cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Server-generated unique document number (`ORD-YYYYMMDD-NNNN`).
    pub order_number: String,

    /// Lifecycle status.
    pub status: OrderStatus,

    /// Table, room, or walk-in.
    pub context: ServiceContext,

    /// Waiter who owns the order.
    pub waiter_id: String,

    /// Waiter display name at placement time (frozen, shown on tickets).
    pub waiter_name: String,

    /// Whole-order discount in basis points.
    pub discount_bps: u32,

    /// Effective tax rate in basis points, frozen at placement
    /// (zero when the venue had tax disabled).
    pub tax_rate_bps: u32,

    /// Stored totals, refreshed in the same transaction as item changes.
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,

    /// Set exactly when the owning invoice is created.
    pub is_billed: bool,

    /// When the order was placed.
    pub created_at: DateTime<Utc>,

    /// When the order was last changed.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Grand total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Recomputes totals from item rows and the frozen order parameters.
    pub fn compute_totals(items: &[OrderItem], discount_bps: u32, tax_rate_bps: u32) -> SaleTotals {
        let subtotal = Money::from_cents(items.iter().map(|i| i.total_price_cents).sum());
        SaleTotals::compute(subtotal, discount_bps, TaxRate::from_bps(tax_rate_bps), true)
    }

    /// Validates a status transition, naming the order in the error.
    pub fn validate_transition(&self, to: OrderStatus) -> CoreResult<()> {
        if self.status.is_terminal() {
            return Err(CoreError::OrderClosed {
                order_id: self.id.clone(),
                status: self.status,
            });
        }
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                order_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// Validates that extra items may still be appended.
    pub fn validate_accepts_items(&self) -> CoreResult<()> {
        if self.status.accepts_items() && !self.is_billed {
            Ok(())
        } else {
            Err(CoreError::OrderClosed {
                order_id: self.id.clone(),
                status: self.status,
            })
        }
    }

    /// Validates that this order may join a billing run under `policy`.
    ///
    /// A billed or cancelled order yields `InvalidTransition` (double
    /// billing is a transition fault, never silent); an active order the
    /// policy refuses yields `NotBillable`.
    pub fn validate_billable(&self, policy: BillingPolicy) -> CoreResult<()> {
        if self.is_billed || self.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                order_id: self.id.clone(),
                from: self.status,
                to: OrderStatus::Billed,
            });
        }
        if !policy.may_bill(self.status) {
            return Err(CoreError::NotBillable {
                order_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Order Item
// =============================================================================

/// One line of a service order.
/// Snapshot pattern: name, station and price are frozen at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    /// Menu item sold.
    pub service_item_id: String,
    /// Name at time of ordering (frozen).
    pub name_snapshot: String,
    /// Ticket routing station at time of ordering (frozen).
    pub station: Station,
    /// Unit price in cents at time of ordering (frozen).
    pub unit_price_cents: i64,
    /// Quantity ordered.
    pub quantity: i64,
    /// Per-line note for the kitchen ("extra spicy").
    pub note: Option<String>,
    /// Line total (unit_price × quantity).
    pub total_price_cents: i64,
    /// Mirror stock product the line drew from, when the menu item was
    /// linked at ordering time (frozen, drives cancellation restock).
    pub stock_product_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    /// Line total as Money.
    #[inline]
    pub fn total_price(&self) -> Money {
        Money::from_cents(self.total_price_cents)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
