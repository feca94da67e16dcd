//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  EngineError (bazaar-engine) ← Mapped for the register UI              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Cashier sees a message they can act on                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conflict Variants
//! The committer relies on three variants that only occur inside
//! transactions: `InsufficientStock` (in-transaction revalidation found less
//! stock than the request), `StockConflict` (a conditional decrement matched
//! zero rows because a concurrent writer got there first) and
//! `StatusConflict`/`BillingConflict` (a guarded status update lost a race).
//! All of them roll the transaction back; `is_retryable` tells callers which
//! ones are worth retrying.

use thiserror::Error;

/// Database operation errors.
///
/// These errors wrap sqlx errors and provide additional context
/// for debugging and user feedback.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_one` returns no rows
    /// - ID doesn't exist
    /// - Soft-deleted record
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting duplicate SKU
    /// - Duplicate batch number for the same product
    /// - Duplicate invoice/order number
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Referencing non-existent product_id
    /// - Referencing non-existent order_id
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// FEFO-allocatable stock cannot cover the requested quantity.
    ///
    /// Raised by the in-transaction revalidation: the plan is rebuilt against
    /// live batch rows before any decrement runs, so a cart built against a
    /// stale availability snapshot fails here instead of overselling.
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// A conditional batch decrement matched zero rows.
    ///
    /// A concurrent transaction drained the batch between planning and
    /// decrementing. The whole transaction rolls back; retrying replans
    /// against whatever stock remains.
    #[error("Concurrent stock change on product {product_id} (batch {batch_id})")]
    StockConflict {
        product_id: String,
        batch_id: String,
    },

    /// A guarded order status update matched zero rows.
    ///
    /// The order moved (or was cancelled) under a concurrent writer.
    #[error("Order {order_id} changed status concurrently")]
    StatusConflict { order_id: String },

    /// An order in a billing run was already billed or closed.
    #[error("Order {order_id} is already billed or closed")]
    BillingConflict { order_id: String },

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file doesn't exist and can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction commit failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Checks whether retrying the whole operation can succeed.
    ///
    /// Conflict variants mean a concurrent writer won a race this attempt;
    /// the next attempt replans against current state and usually goes
    /// through. Everything else needs operator attention first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DbError::StockConflict { .. }
                | DbError::StatusConflict { .. }
                | DbError::PoolExhausted
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLite constraint messages:
                // UNIQUE: "UNIQUE constraint failed: <table>.<column>"
                // FK: "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
