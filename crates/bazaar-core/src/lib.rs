//! # bazaar-core: Pure Business Logic for Bazaar POS
//!
//! This crate is the **heart** of Bazaar POS. It contains all transaction
//! logic as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Bazaar POS Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  bazaar-engine (Orchestration)                  │   │
//! │  │   Checkout sessions ──► Order desk ──► Sinks (tickets/receipts) │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ bazaar-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐  │   │
//! │  │   │  money   │ │   cart   │ │  tender  │ │    allocation    │  │   │
//! │  │   │  Money   │ │   Cart   │ │  Split   │ │    FEFO plans    │  │   │
//! │  │   │  TaxCalc │ │  Totals  │ │  Change  │ │    shortfalls    │  │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────────────┘  │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐                       │   │
//! │  │   │  types   │ │  order   │ │validation│                       │   │
//! │  │   │ Product  │ │ Lifecycle│ │  rules   │                       │   │
//! │  │   │  Batch   │ │  Policy  │ │  checks  │                       │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘                       │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                   bazaar-db (Storage Layer)                     │   │
//! │  │        SQLite repositories, migrations, atomic committer        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, ProductBatch, ServiceItem, Invoice, etc.)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`cart`] - Mutable cart with deterministic totals
//! - [`tender`] - Split-tender settlement and change calculation
//! - [`allocation`] - FEFO batch allocation planning
//! - [`order`] - Order lifecycle state machine and billing policy
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are in cents (i64) to avoid float errors
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use bazaar_core::money::Money;
//! use bazaar_core::types::TaxRate;
//!
//! // Create money from cents (never from floats!)
//! let price = Money::from_cents(10000); // 100.00
//!
//! // Tax at 18% GST, half-up rounding
//! let tax_rate = TaxRate::from_bps(1800);
//! let tax = price.calculate_tax(tax_rate);
//! assert_eq!(tax.cents(), 1800);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod cart;
pub mod error;
pub mod money;
pub mod order;
pub mod tender;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use bazaar_core::Money` instead of
// `use bazaar_core::money::Money`

pub use allocation::{AllocationPlan, BatchAllocation};
pub use cart::{Cart, CartLine, LineRef, SaleTotals};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use order::{BillingPolicy, Order, OrderItem, OrderStatus, ServiceContext};
pub use tender::{TenderLine, TenderSplit, SETTLEMENT_EPSILON};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single cart
///
/// ## Business Reason
/// Prevents runaway carts and ensures reasonable transaction sizes.
/// Can be made configurable per-venue in future versions.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity of a single line in a cart or order
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
/// Configurable per-venue in future versions.
pub const MAX_LINE_QUANTITY: i64 = 999;
