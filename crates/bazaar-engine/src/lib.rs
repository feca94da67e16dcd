//! # bazaar-engine: Checkout Engine for Bazaar POS
//!
//! This crate is the orchestration layer of Bazaar POS: it drives direct
//! sales and served orders over the storage layer and talks to the devices
//! and ledgers at the edge of the system.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Checkout Engine                                  │
//! │                                                                         │
//! │  ┌──────────────────────────┐   ┌──────────────────────────────────┐   │
//! │  │     CheckoutService      │   │            OrderDesk             │   │
//! │  │                          │   │                                  │   │
//! │  │ Direct register sales    │   │ Table/room/walk-in orders        │   │
//! │  │ CheckoutSession phases   │   │ Kitchen flow + combined billing  │   │
//! │  │ Split tender + folio     │   │ Station ticket fan-out           │   │
//! │  └────────────┬─────────────┘   └────────────────┬─────────────────┘   │
//! │               │                                  │                      │
//! │               ├────────────┬─────────────────────┤                      │
//! │               ▼            ▼                     ▼                      │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   bazaar-db    │  │  Sink traits   │  │       PosConfig        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Transactional  │  │ TicketSink     │  │ TOML + env overrides   │    │
//! │  │ committer,     │  │ ReceiptSink    │  │ store identity, tax,   │    │
//! │  │ repositories   │  │ FolioPoster    │  │ billing policy         │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  COMMIT ORDERING:                                                       │
//! │  • folio posting first (the ledger that can refuse)                     │
//! │  • SQLite transaction second (stock, order states, invoice)             │
//! │  • receipt/ticket dispatch last (fire-and-forget, WARN on failure)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`checkout`] - Direct-sale orchestration over a [`CheckoutSession`]
//! - [`orders`] - Order lifecycle, station tickets and combined billing
//! - [`session`] - The shopping/tendering/committed phase machine
//! - [`sinks`] - Ticket, receipt and folio boundaries with in-memory fakes
//! - [`config`] - Runtime configuration loaded from TOML
//! - [`error`] - Engine error types layered over core and storage errors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bazaar_db::{Database, DbConfig};
//! use bazaar_engine::{CheckoutService, PosConfig};
//!
//! let config = PosConfig::load_or_default(None);
//! let db = Arc::new(Database::new(DbConfig::new("bazaar.db")).await?);
//! let service = CheckoutService::new(db, config, receipts, folio);
//!
//! let mut session = service.open_session();
//! service.add_product(&mut session, &product_id, 2).await?;
//! service.begin_tender(&mut session)?;
//! service.tender_single(&mut session, TenderType::Cash, cash, None).await?;
//! let invoice = service.commit_sale(&mut session).await?;
//! ```

use tracing::Level;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Module Declarations
// =============================================================================

pub mod checkout;
pub mod config;
pub mod error;
pub mod orders;
pub mod session;
pub mod sinks;

// =============================================================================
// Re-exports
// =============================================================================

// Orchestration
pub use checkout::CheckoutService;
pub use orders::{OrderDesk, OrderItemRequest, PlaceOrder};
pub use session::{CheckoutSession, FolioPosting, SessionPhase};

// Configuration and errors
pub use config::{BillingSettings, PosConfig, StoreSettings, TaxSettings};
pub use error::{EngineError, EngineResult};

// Edge boundaries
pub use sinks::{
    FolioCharge, FolioPoster, KitchenTicket, MemoryFolioPoster, MemoryReceiptSink,
    MemoryTicketSink, ReceiptSink, ReceiptSnapshot, TicketItem, TicketSink,
};

// =============================================================================
// Tracing Setup
// =============================================================================

/// Initializes tracing for an embedding application.
///
/// Respects `RUST_LOG`:
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=bazaar=trace` - Show trace for bazaar crates only
/// - Default: INFO level, DEBUG for bazaar crates, WARN for sqlx
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bazaar=debug,sqlx=warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::TRACE)
        .try_init();
}
