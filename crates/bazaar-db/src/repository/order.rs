//! # Order Repository
//!
//! Reads and guarded status updates for service orders.
//!
//! ## Optimistic Status Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │         Two waiters move the same order at the same time                │
//! │                                                                         │
//! │  Waiter A: saw 'pending', wants 'preparing'                            │
//! │  Waiter B: saw 'pending', wants 'cancelled'                            │
//! │                                                                         │
//! │  UPDATE orders SET status = :to                                        │
//! │  WHERE id = :id AND status = :expected_from                            │
//! │                                                                         │
//! │  First writer matches one row and wins. The second matches zero        │
//! │  rows and gets StatusConflict instead of silently clobbering the       │
//! │  first writer's decision.                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use bazaar_core::{Order, OrderItem, OrderStatus, ServiceContext};

/// Columns selected for every order read.
pub(crate) const ORDER_COLUMNS: &str = r#"
    id, order_number, status, table_number, room_ref,
    waiter_id, waiter_name, discount_bps, tax_rate_bps,
    subtotal_cents, discount_cents, tax_cents, total_cents,
    is_billed, created_at, updated_at
"#;

/// Columns selected for every order item read.
pub(crate) const ORDER_ITEM_COLUMNS: &str = r#"
    id, order_id, service_item_id, name_snapshot, station,
    unit_price_cents, quantity, note, total_price_cents,
    stock_product_id, created_at
"#;

/// Flat row shape of the `orders` table.
///
/// `Order` carries a [`ServiceContext`] enum where the table stores two
/// nullable columns, so rows pass through this struct on the way out.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OrderRow {
    pub id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub table_number: Option<String>,
    pub room_ref: Option<String>,
    pub waiter_id: String,
    pub waiter_name: String,
    pub discount_bps: u32,
    pub tax_rate_bps: u32,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub is_billed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Order {
            id: row.id,
            order_number: row.order_number,
            status: row.status,
            context: ServiceContext::from_columns(row.table_number, row.room_ref),
            waiter_id: row.waiter_id,
            waiter_name: row.waiter_name,
            discount_bps: row.discount_bps,
            tax_rate_bps: row.tax_rate_bps,
            subtotal_cents: row.subtotal_cents,
            discount_cents: row.discount_cents,
            tax_cents: row.tax_cents,
            total_cents: row.total_cents,
            is_billed: row.is_billed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for order database operations.
///
/// Order creation, item appends, cancellation and billing are transactional
/// and live in [`CheckoutRepository`](crate::repository::checkout); this
/// repository covers reads and single-step status moves.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Gets an order by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");

        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Order::from))
    }

    /// Gets an order by its document number.
    pub async fn get_by_number(&self, order_number: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = ?1");

        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Order::from))
    }

    /// Gets all items of an order, oldest first.
    pub async fn get_items(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let sql = format!(
            r#"
            SELECT {ORDER_ITEM_COLUMNS} FROM order_items
            WHERE order_id = ?1
            ORDER BY created_at, id
            "#
        );

        let items = sqlx::query_as::<_, OrderItem>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Lists open orders (neither billed nor cancelled), oldest first.
    pub async fn list_open(&self) -> DbResult<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status NOT IN ('billed', 'cancelled')
            ORDER BY created_at
            "#
        );

        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Order::from).collect())
    }

    /// Lists orders in a given status, oldest first.
    pub async fn list_by_status(&self, status: OrderStatus) -> DbResult<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status = ?1
            ORDER BY created_at
            "#
        );

        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Order::from).collect())
    }

    /// Lists a waiter's open orders, oldest first.
    pub async fn list_open_for_waiter(&self, waiter_id: &str) -> DbResult<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE waiter_id = ?1 AND status NOT IN ('billed', 'cancelled')
            ORDER BY created_at
            "#
        );

        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(waiter_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Order::from).collect())
    }

    /// Moves an order from `from` to `to` with an optimistic guard.
    ///
    /// The caller validates the transition against the state machine first;
    /// this method only closes the write race. Zero affected rows means a
    /// concurrent writer moved the order since the caller read it.
    pub async fn update_status(
        &self,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
    ) -> DbResult<()> {
        debug!(order_id = %order_id, from = %from, to = %to, "Updating order status");

        let result = sqlx::query(
            r#"
            UPDATE orders SET status = ?3, updated_at = ?4
            WHERE id = ?1 AND status = ?2
            "#,
        )
        .bind(order_id)
        .bind(from)
        .bind(to)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing order from a lost race
            let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE id = ?1")
                .bind(order_id)
                .fetch_one(&self.pool)
                .await?;
            if exists == 0 {
                return Err(DbError::not_found("Order", order_id));
            }
            return Err(DbError::StatusConflict {
                order_id: order_id.to_string(),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
