//! # Batch Repository
//!
//! Read operations for product batch lots.
//!
//! ## FEFO Ordering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │             First-Expired-First-Out read order                          │
//! │                                                                         │
//! │  ORDER BY (expiry_date IS NULL),  ← dated lots before undated          │
//! │           expiry_date,            ← soonest expiry first               │
//! │           received_at,            ← oldest receipt breaks ties         │
//! │           id                      ← total order for determinism        │
//! │                                                                         │
//! │  The committer re-reads lots in this exact order inside its            │
//! │  transaction, so a plan built here matches what commit will see        │
//! │  unless a concurrent sale lands in between.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::SqlitePool;

use crate::error::DbResult;
use bazaar_core::ProductBatch;

/// Columns selected for every batch read.
pub(crate) const BATCH_COLUMNS: &str = r#"
    id, product_id, batch_number, quantity,
    purchase_price_cents, selling_price_cents,
    expiry_date, received_at, created_at
"#;

/// FEFO sort clause shared by every availability read.
pub(crate) const FEFO_ORDER: &str =
    "(expiry_date IS NULL), expiry_date, received_at, id";

/// Repository for batch database operations.
///
/// Writes go through [`StockRepository`](crate::repository::stock) or the
/// committer; this repository only reads.
#[derive(Debug, Clone)]
pub struct BatchRepository {
    pool: SqlitePool,
}

impl BatchRepository {
    /// Creates a new BatchRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BatchRepository { pool }
    }

    /// Gets a batch by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<ProductBatch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM product_batches WHERE id = ?1");

        let batch = sqlx::query_as::<_, ProductBatch>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(batch)
    }

    /// Lists a product's batches that still hold stock, in FEFO order.
    pub async fn list_available(&self, product_id: &str) -> DbResult<Vec<ProductBatch>> {
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM product_batches
            WHERE product_id = ?1 AND quantity > 0
            ORDER BY {FEFO_ORDER}
            "#
        );

        let batches = sqlx::query_as::<_, ProductBatch>(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(batches)
    }

    /// Lists all of a product's batches (including drained ones), in FEFO
    /// order. Used by stock screens.
    pub async fn list_for_product(&self, product_id: &str) -> DbResult<Vec<ProductBatch>> {
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM product_batches
            WHERE product_id = ?1
            ORDER BY {FEFO_ORDER}
            "#
        );

        let batches = sqlx::query_as::<_, ProductBatch>(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(batches)
    }

    /// Sums the units currently available across a product's batches.
    ///
    /// This is the authoritative availability number; the product row's
    /// `stock_quantity` is a cache of the same sum.
    pub async fn available_quantity(&self, product_id: &str) -> DbResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(quantity) FROM product_batches WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0))
    }

    /// Lists batches expiring on or before the given date that still hold
    /// stock, across all products. Drives the "expiring soon" screen.
    pub async fn list_expiring_by(&self, cutoff: chrono::NaiveDate) -> DbResult<Vec<ProductBatch>> {
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM product_batches
            WHERE quantity > 0 AND expiry_date IS NOT NULL AND expiry_date <= ?1
            ORDER BY expiry_date, product_id
            "#
        );

        let batches = sqlx::query_as::<_, ProductBatch>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        Ok(batches)
    }
}
