//! # Repository Layer
//!
//! Repository implementations for database access.
//!
//! ## Repository Pattern
//! Each repository:
//! - Owns a clone of the connection pool
//! - Provides domain-specific query methods
//! - Returns domain types from bazaar-core
//! - Converts sqlx errors to DbError
//!
//! ## Repositories
//! - [`product`] - Products and the cached stock aggregate
//! - [`batch`] - Batch lots and FEFO-ordered reads
//! - [`service_item`] - Menu/service items
//! - [`stock`] - Stock ledger: intake, adjustment, movement queries
//! - [`order`] - Order reads and guarded status updates
//! - [`invoice`] - Invoice reads and settlement
//! - [`checkout`] - The transactional committer (sales, orders, billing)

pub mod batch;
pub mod checkout;
pub mod invoice;
pub mod order;
pub mod product;
pub mod service_item;
pub mod stock;
