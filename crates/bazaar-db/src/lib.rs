//! # bazaar-db: Storage Layer for Bazaar POS
//!
//! This crate provides database access for the Bazaar POS engine.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Bazaar POS Data Flow                             │
//! │                                                                         │
//! │  bazaar-engine (CheckoutService / OrderDesk)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     bazaar-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ (product.rs,  │    │  (embedded)  │  │   │
//! │  │   │               │    │  checkout.rs) │    │              │  │   │
//! │  │   │ SqlitePool    │    │ ProductRepo   │    │ 001_core_    │  │   │
//! │  │   │ Connection    │◄───│ CheckoutRepo  │    │ 002_orders_  │  │   │
//! │  │   │ Management    │    │ InvoiceRepo   │    │ ...          │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/bazaar.db  (WAL mode, foreign keys on)             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (product, checkout, etc.)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bazaar_db::{Database, DbConfig};
//!
//! // Create database with default config (runs migrations)
//! let config = DbConfig::new("path/to/bazaar.db");
//! let db = Database::new(config).await?;
//!
//! // Use repositories
//! let low = db.products().list_low_stock().await?;
//! let invoice = db.checkout().commit_sale(commit).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::batch::BatchRepository;
pub use repository::checkout::{
    BillingRun, CheckoutRepository, OrderDraft, OrderLine, SaleCommit, SaleLine,
};
pub use repository::invoice::InvoiceRepository;
pub use repository::order::OrderRepository;
pub use repository::product::ProductRepository;
pub use repository::service_item::ServiceItemRepository;
pub use repository::stock::StockRepository;
