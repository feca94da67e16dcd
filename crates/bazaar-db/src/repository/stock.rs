//! # Stock Ledger Repository
//!
//! Batch intake, manual adjustments and movement queries.
//!
//! ## Every Unit Is Accounted For
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │               One transaction per stock mutation                        │
//! │                                                                         │
//! │  receive_batch:                  adjust_batch:                          │
//! │    1. products cache  += qty       1. guarded quantity += delta         │
//! │    2. INSERT batch row             2. INSERT movement (adjustment)      │
//! │    3. INSERT movement (in)         3. products cache += delta           │
//! │                                                                         │
//! │  The movement row and the quantity change land together or not at      │
//! │  all, so the ledger always replays to the current batch state.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use bazaar_core::{MovementKind, ProductBatch, StockMovement};

/// Columns selected for every movement read.
pub(crate) const MOVEMENT_COLUMNS: &str = r#"
    id, product_id, batch_id, quantity,
    movement, reason, reference_id, created_at
"#;

/// Repository for stock ledger operations.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Receives a new batch lot into stock.
    ///
    /// ## What Lands Atomically
    /// 1. Product cache bumped by the received quantity
    /// 2. The batch row itself
    /// 3. An `in` movement for the audit trail
    ///
    /// ## Errors
    /// * `NotFound` - product does not exist
    /// * `UniqueViolation` - batch number already used for this product
    pub async fn receive_batch(
        &self,
        product_id: &str,
        batch_number: &str,
        quantity: i64,
        purchase_price_cents: i64,
        selling_price_cents: i64,
        expiry_date: Option<NaiveDate>,
    ) -> DbResult<ProductBatch> {
        let now = Utc::now();
        let batch = ProductBatch {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.to_string(),
            batch_number: batch_number.to_string(),
            quantity,
            purchase_price_cents,
            selling_price_cents,
            expiry_date,
            received_at: now,
            created_at: now,
        };

        debug!(
            product_id = %product_id,
            batch_number = %batch_number,
            quantity = %quantity,
            "Receiving batch"
        );

        let mut tx = self.pool.begin().await?;

        let cache = sqlx::query(
            r#"
            UPDATE products SET stock_quantity = stock_quantity + ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if cache.rows_affected() == 0 {
            return Err(DbError::not_found("Product", product_id));
        }

        sqlx::query(
            r#"
            INSERT INTO product_batches (
                id, product_id, batch_number, quantity,
                purchase_price_cents, selling_price_cents,
                expiry_date, received_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&batch.id)
        .bind(&batch.product_id)
        .bind(&batch.batch_number)
        .bind(batch.quantity)
        .bind(batch.purchase_price_cents)
        .bind(batch.selling_price_cents)
        .bind(batch.expiry_date)
        .bind(batch.received_at)
        .bind(batch.created_at)
        .execute(&mut *tx)
        .await?;

        insert_movement(
            &mut tx,
            product_id,
            Some(&batch.id),
            quantity,
            MovementKind::In,
            "batch received",
            None,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            product_id = %product_id,
            batch_id = %batch.id,
            quantity = %quantity,
            "Batch received"
        );

        Ok(batch)
    }

    /// Applies a manual correction to a batch (stocktake, damage, shrinkage).
    ///
    /// `delta` is signed: positive adds units, negative removes them. The
    /// guarded update refuses a correction that would drive the batch
    /// negative.
    pub async fn adjust_batch(&self, batch_id: &str, delta: i64, reason: &str) -> DbResult<()> {
        if delta == 0 {
            return Ok(());
        }

        debug!(batch_id = %batch_id, delta = %delta, reason = %reason, "Adjusting batch");

        let mut tx = self.pool.begin().await?;

        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT product_id, quantity FROM product_batches WHERE id = ?1")
                .bind(batch_id)
                .fetch_optional(&mut *tx)
                .await?;

        let (product_id, available) = match row {
            Some(pair) => pair,
            None => return Err(DbError::not_found("Batch", batch_id)),
        };

        let guarded = sqlx::query(
            r#"
            UPDATE product_batches SET quantity = quantity + ?2
            WHERE id = ?1 AND quantity + ?2 >= 0
            "#,
        )
        .bind(batch_id)
        .bind(delta)
        .execute(&mut *tx)
        .await?;

        if guarded.rows_affected() == 0 {
            return Err(DbError::InsufficientStock {
                product_id,
                available,
                requested: -delta,
            });
        }

        insert_movement(
            &mut tx,
            &product_id,
            Some(batch_id),
            delta,
            MovementKind::Adjustment,
            reason,
            None,
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE products SET stock_quantity = stock_quantity + ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(&product_id)
        .bind(delta)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        Ok(())
    }

    /// Lists a product's movements, newest first.
    pub async fn movements_for_product(
        &self,
        product_id: &str,
        limit: u32,
    ) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS} FROM stock_movements
            WHERE product_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#
        );

        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(product_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(movements)
    }

    /// Lists the movements caused by one invoice or order.
    pub async fn movements_for_reference(&self, reference_id: &str) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS} FROM stock_movements
            WHERE reference_id = ?1
            ORDER BY created_at
            "#
        );

        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(reference_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(movements)
    }
}

/// Inserts one movement row inside an open transaction.
///
/// Shared with the checkout committer, which writes `out` rows for sales
/// and `in` rows for cancellation restocks in its own transactions.
pub(crate) async fn insert_movement(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    product_id: &str,
    batch_id: Option<&str>,
    quantity: i64,
    movement: MovementKind,
    reason: &str,
    reference_id: Option<&str>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, product_id, batch_id, quantity,
            movement, reason, reference_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(product_id)
    .bind(batch_id)
    .bind(quantity)
    .bind(movement)
    .bind(reason)
    .bind(reference_id)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
