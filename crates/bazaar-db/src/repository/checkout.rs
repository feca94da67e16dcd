//! # Checkout Repository
//!
//! The transactional committer. Every state-changing sale and order
//! operation runs as exactly one SQLite transaction here.
//!
//! ## The Commit Pipeline (direct sale)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    commit_sale: one transaction                         │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    │                                                                    │
//! │    ├─ 1. INSERT invoice (number derived in-statement)                  │
//! │    ├─ 2. INSERT invoice_items (snapshots)                              │
//! │    ├─ 3. INSERT invoice_payments (tender rows)                         │
//! │    ├─ 4. For each demanded product:                                    │
//! │    │      ├─ re-read live batches in FEFO order                        │
//! │    │      ├─ re-plan the allocation                                    │
//! │    │      ├─ short? ──────────────► Err(InsufficientStock) ─► ROLLBACK │
//! │    │      ├─ per lot: UPDATE batches                                   │
//! │    │      │           SET quantity = quantity - :n                     │
//! │    │      │           WHERE id = :id AND quantity >= :n                │
//! │    │      ├─ zero rows? ──────────► Err(StockConflict) ────► ROLLBACK  │
//! │    │      ├─ INSERT stock_movements (out, ref = invoice)               │
//! │    │      └─ UPDATE products cache (delta)                             │
//! │    ▼                                                                    │
//! │  COMMIT ── receipt may print                                           │
//! │                                                                         │
//! │  Ticket/receipt/folio side effects live in bazaar-engine and never     │
//! │  run inside this transaction.                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Why Replan Inside The Transaction
//! The cart was priced and checked against an availability snapshot that may
//! be minutes old. Replanning against live rows inside the transaction,
//! with conditional decrements as the backstop, means two registers selling
//! the last units of the same lot cannot both succeed: one commits, the
//! other rolls back with a retryable conflict.
//!
//! ## Document Numbers
//! `ORD-YYYYMMDD-NNNN` / `INV-YYYYMMDD-NNNN`. The daily counter is derived
//! by a scalar subquery inside the INSERT itself, so the count and the new
//! row land under the same write lock and two registers cannot mint the
//! same number.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::batch::{BATCH_COLUMNS, FEFO_ORDER};
use crate::repository::order::{OrderRow, ORDER_COLUMNS, ORDER_ITEM_COLUMNS};
use crate::repository::stock::{insert_movement, MOVEMENT_COLUMNS};
use bazaar_core::allocation::plan_fefo;
use bazaar_core::{
    Invoice, MovementKind, Order, OrderItem, OrderStatus, PaymentStatus, ProductBatch,
    SaleTotals, ServiceContext, Station, StockMovement, TenderLine,
};

type Tx<'a> = Transaction<'a, Sqlite>;

// =============================================================================
// Commit Inputs
// =============================================================================

/// A fully settled cart, ready to become an invoice.
///
/// Built by the engine from a `Cart` and its `TenderSplit`; by the time a
/// value of this type exists, totals are frozen and payments reconcile.
#[derive(Debug, Clone)]
pub struct SaleCommit {
    /// Line snapshots in cart order.
    pub lines: Vec<SaleLine>,
    /// Frozen totals the lines were settled against.
    pub totals: SaleTotals,
    /// Serialized tender summary ("cash", "cash+card", ...).
    pub payment_method: String,
    /// Tender rows to persist.
    pub payments: Vec<TenderLine>,
    /// `Paid`, or `Pending` for room charges awaiting folio settlement.
    pub payment_status: PaymentStatus,
    /// Folio/booking reference for room charges.
    pub folio_ref: Option<String>,
    /// Aggregated stock demand: (product id, units), one entry per product.
    pub stock_demands: Vec<(String, i64)>,
}

/// One invoice line snapshot.
#[derive(Debug, Clone)]
pub struct SaleLine {
    pub product_id: Option<String>,
    pub service_item_id: Option<String>,
    pub name_snapshot: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub note: Option<String>,
}

/// A new order to place.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub context: ServiceContext,
    pub waiter_id: String,
    pub waiter_name: String,
    /// Effective tax rate frozen at placement (zero when tax is disabled).
    pub tax_rate_bps: u32,
    pub discount_bps: u32,
    pub lines: Vec<OrderLine>,
}

/// One order line to append.
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub service_item_id: String,
    pub name_snapshot: String,
    pub station: Station,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub note: Option<String>,
    /// Mirror product this line draws stock from, when linked.
    pub stock_product_id: Option<String>,
}

/// One or more orders to bill into a single invoice.
#[derive(Debug, Clone)]
pub struct BillingRun {
    pub order_ids: Vec<String>,
    /// Serialized tender summary for the invoice row.
    pub payment_method: String,
    pub payments: Vec<TenderLine>,
    pub payment_status: PaymentStatus,
    pub folio_ref: Option<String>,
}

// =============================================================================
// Checkout Repository
// =============================================================================

/// Transactional committer for sales, orders and billing runs.
#[derive(Debug, Clone)]
pub struct CheckoutRepository {
    pool: SqlitePool,
}

impl CheckoutRepository {
    /// Creates a new CheckoutRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CheckoutRepository { pool }
    }

    /// Commits a direct sale: invoice, items, payments and stock effects in
    /// one transaction.
    ///
    /// ## Errors
    /// * `InsufficientStock` - live availability no longer covers a line
    /// * `StockConflict` - a concurrent sale won a lot race (retryable)
    pub async fn commit_sale(&self, commit: SaleCommit) -> DbResult<Invoice> {
        let now = Utc::now();
        let invoice_id = Uuid::new_v4().to_string();
        let (prefix, like) = document_prefix("INV");

        debug!(
            lines = commit.lines.len(),
            total_cents = commit.totals.total_cents,
            "Committing sale"
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, invoice_number, subtotal_cents, discount_cents,
                tax_cents, total_cents, payment_method, payment_status,
                folio_ref, created_at
            ) VALUES (
                ?1,
                ?2 || printf('%04d', (SELECT COUNT(*) + 1 FROM invoices WHERE invoice_number LIKE ?3)),
                ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            )
            "#,
        )
        .bind(&invoice_id)
        .bind(&prefix)
        .bind(&like)
        .bind(commit.totals.subtotal_cents)
        .bind(commit.totals.discount_cents)
        .bind(commit.totals.tax_cents)
        .bind(commit.totals.total_cents)
        .bind(&commit.payment_method)
        .bind(commit.payment_status)
        .bind(&commit.folio_ref)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let invoice_number: String =
            sqlx::query_scalar("SELECT invoice_number FROM invoices WHERE id = ?1")
                .bind(&invoice_id)
                .fetch_one(&mut *tx)
                .await?;

        for line in &commit.lines {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (
                    id, invoice_id, product_id, service_item_id,
                    name_snapshot, unit_price_cents, quantity,
                    line_total_cents, note, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&invoice_id)
            .bind(&line.product_id)
            .bind(&line.service_item_id)
            .bind(&line.name_snapshot)
            .bind(line.unit_price_cents)
            .bind(line.quantity)
            .bind(line.unit_price_cents * line.quantity)
            .bind(&line.note)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        insert_payments(&mut tx, &invoice_id, &commit.payments, now).await?;

        for (product_id, quantity) in &commit.stock_demands {
            draw_stock(&mut tx, product_id, *quantity, "sale", &invoice_id).await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            invoice_number = %invoice_number,
            total_cents = commit.totals.total_cents,
            payment_method = %commit.payment_method,
            "Sale committed"
        );

        Ok(Invoice {
            id: invoice_id,
            invoice_number,
            subtotal_cents: commit.totals.subtotal_cents,
            discount_cents: commit.totals.discount_cents,
            tax_cents: commit.totals.tax_cents,
            total_cents: commit.totals.total_cents,
            payment_method: commit.payment_method,
            payment_status: commit.payment_status,
            folio_ref: commit.folio_ref,
            created_at: now,
        })
    }

    /// Places a new order: order row, item snapshots and stock draws in one
    /// transaction. Stock for linked items is drawn here, at placement.
    pub async fn place_order(&self, draft: OrderDraft) -> DbResult<Order> {
        let now = Utc::now();
        let order_id = Uuid::new_v4().to_string();
        let (prefix, like) = document_prefix("ORD");

        let items = build_order_items(&order_id, &draft.lines, now);
        let totals = Order::compute_totals(&items, draft.discount_bps, draft.tax_rate_bps);

        debug!(
            context = %draft.context,
            lines = items.len(),
            "Placing order"
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, status, table_number, room_ref,
                waiter_id, waiter_name, discount_bps, tax_rate_bps,
                subtotal_cents, discount_cents, tax_cents, total_cents,
                is_billed, created_at, updated_at
            ) VALUES (
                ?1,
                ?2 || printf('%04d', (SELECT COUNT(*) + 1 FROM orders WHERE order_number LIKE ?3)),
                ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17
            )
            "#,
        )
        .bind(&order_id)
        .bind(&prefix)
        .bind(&like)
        .bind(OrderStatus::Pending)
        .bind(draft.context.table_number())
        .bind(draft.context.room_ref())
        .bind(&draft.waiter_id)
        .bind(&draft.waiter_name)
        .bind(draft.discount_bps)
        .bind(draft.tax_rate_bps)
        .bind(totals.subtotal_cents)
        .bind(totals.discount_cents)
        .bind(totals.tax_cents)
        .bind(totals.total_cents)
        .bind(false)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let order_number: String =
            sqlx::query_scalar("SELECT order_number FROM orders WHERE id = ?1")
                .bind(&order_id)
                .fetch_one(&mut *tx)
                .await?;

        insert_order_items(&mut tx, &items).await?;

        for (product_id, quantity) in aggregate_demands(&items) {
            draw_stock(&mut tx, &product_id, quantity, "order", &order_id).await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            order_number = %order_number,
            context = %draft.context,
            total_cents = totals.total_cents,
            "Order placed"
        );

        Ok(Order {
            id: order_id,
            order_number,
            status: OrderStatus::Pending,
            context: draft.context,
            waiter_id: draft.waiter_id,
            waiter_name: draft.waiter_name,
            discount_bps: draft.discount_bps,
            tax_rate_bps: draft.tax_rate_bps,
            subtotal_cents: totals.subtotal_cents,
            discount_cents: totals.discount_cents,
            tax_cents: totals.tax_cents,
            total_cents: totals.total_cents,
            is_billed: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Appends items to an open order, drawing stock for linked lines and
    /// refreshing the stored totals, all in one transaction.
    pub async fn append_items(&self, order_id: &str, lines: Vec<OrderLine>) -> DbResult<Order> {
        let now = Utc::now();
        let new_items = build_order_items(order_id, &lines, now);

        debug!(order_id = %order_id, lines = new_items.len(), "Appending order items");

        let mut tx = self.pool.begin().await?;

        // Guarded touch first: refuses closed orders and takes the write
        // lock before anything else reads.
        let guard = sqlx::query(
            r#"
            UPDATE orders SET updated_at = ?2
            WHERE id = ?1 AND is_billed = 0 AND status NOT IN ('billed', 'cancelled')
            "#,
        )
        .bind(order_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if guard.rows_affected() == 0 {
            return Err(order_guard_error(&mut tx, order_id).await?);
        }

        let row = fetch_order_row(&mut tx, order_id).await?;

        insert_order_items(&mut tx, &new_items).await?;

        for (product_id, quantity) in aggregate_demands(&new_items) {
            draw_stock(&mut tx, &product_id, quantity, "order", order_id).await?;
        }

        let all_items = fetch_order_items(&mut tx, order_id).await?;
        let totals = Order::compute_totals(&all_items, row.discount_bps, row.tax_rate_bps);

        sqlx::query(
            r#"
            UPDATE orders SET
                subtotal_cents = ?2,
                discount_cents = ?3,
                tax_cents = ?4,
                total_cents = ?5,
                updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(order_id)
        .bind(totals.subtotal_cents)
        .bind(totals.discount_cents)
        .bind(totals.tax_cents)
        .bind(totals.total_cents)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            order_number = %row.order_number,
            added = new_items.len(),
            total_cents = totals.total_cents,
            "Order items appended"
        );

        let mut order = Order::from(row);
        order.subtotal_cents = totals.subtotal_cents;
        order.discount_cents = totals.discount_cents;
        order.tax_cents = totals.tax_cents;
        order.total_cents = totals.total_cents;
        order.updated_at = now;
        Ok(order)
    }

    /// Cancels an open order and restocks every unit it drew.
    ///
    /// The restock replays the order's `out` movements in reverse, so
    /// units return to the exact lots they came from.
    pub async fn cancel_order(&self, order_id: &str) -> DbResult<Order> {
        let now = Utc::now();

        debug!(order_id = %order_id, "Cancelling order");

        let mut tx = self.pool.begin().await?;

        let guard = sqlx::query(
            r#"
            UPDATE orders SET status = 'cancelled', updated_at = ?2
            WHERE id = ?1 AND status NOT IN ('billed', 'cancelled')
            "#,
        )
        .bind(order_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if guard.rows_affected() == 0 {
            return Err(order_guard_error(&mut tx, order_id).await?);
        }

        let row = fetch_order_row(&mut tx, order_id).await?;

        let draws = fetch_out_movements(&mut tx, order_id).await?;
        let mut cache_deltas: BTreeMap<String, i64> = BTreeMap::new();

        for movement in &draws {
            if let Some(batch_id) = &movement.batch_id {
                sqlx::query("UPDATE product_batches SET quantity = quantity + ?2 WHERE id = ?1")
                    .bind(batch_id)
                    .bind(movement.quantity)
                    .execute(&mut *tx)
                    .await?;
            }

            insert_movement(
                &mut tx,
                &movement.product_id,
                movement.batch_id.as_deref(),
                movement.quantity,
                MovementKind::In,
                "order cancelled",
                Some(order_id),
            )
            .await?;

            *cache_deltas.entry(movement.product_id.clone()).or_insert(0) += movement.quantity;
        }

        for (product_id, delta) in cache_deltas {
            sqlx::query(
                r#"
                UPDATE products SET stock_quantity = stock_quantity + ?2, updated_at = ?3
                WHERE id = ?1
                "#,
            )
            .bind(&product_id)
            .bind(delta)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            order_number = %row.order_number,
            restocked_moves = draws.len(),
            "Order cancelled"
        );

        Ok(Order::from(row))
    }

    /// Bills one or more orders into a single combined invoice.
    ///
    /// Marks every order billed (guarded against double billing), copies
    /// their item snapshots onto the invoice and records the tender rows.
    /// Stock is NOT touched: every unit was drawn when its line was placed.
    ///
    /// Combined totals are the component-wise sums of the per-order stored
    /// totals, so each order keeps the rounding it was priced with.
    pub async fn bill_orders(&self, run: BillingRun) -> DbResult<Invoice> {
        if run.order_ids.is_empty() {
            return Err(DbError::Internal(
                "billing run contained no orders".to_string(),
            ));
        }

        let now = Utc::now();
        let invoice_id = Uuid::new_v4().to_string();
        let (prefix, like) = document_prefix("INV");

        debug!(orders = run.order_ids.len(), "Billing orders");

        let mut tx = self.pool.begin().await?;

        for order_id in &run.order_ids {
            let guard = sqlx::query(
                r#"
                UPDATE orders SET status = 'billed', is_billed = 1, updated_at = ?2
                WHERE id = ?1 AND is_billed = 0 AND status NOT IN ('billed', 'cancelled')
                "#,
            )
            .bind(order_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if guard.rows_affected() == 0 {
                let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE id = ?1")
                    .bind(order_id)
                    .fetch_one(&mut *tx)
                    .await?;
                if exists == 0 {
                    return Err(DbError::not_found("Order", order_id));
                }
                return Err(DbError::BillingConflict {
                    order_id: order_id.clone(),
                });
            }
        }

        let mut totals = SaleTotals {
            subtotal_cents: 0,
            discount_cents: 0,
            tax_cents: 0,
            total_cents: 0,
        };
        let mut all_items: Vec<OrderItem> = Vec::new();

        for order_id in &run.order_ids {
            let row = fetch_order_row(&mut tx, order_id).await?;
            totals.subtotal_cents += row.subtotal_cents;
            totals.discount_cents += row.discount_cents;
            totals.tax_cents += row.tax_cents;
            totals.total_cents += row.total_cents;

            all_items.extend(fetch_order_items(&mut tx, order_id).await?);
        }

        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, invoice_number, subtotal_cents, discount_cents,
                tax_cents, total_cents, payment_method, payment_status,
                folio_ref, created_at
            ) VALUES (
                ?1,
                ?2 || printf('%04d', (SELECT COUNT(*) + 1 FROM invoices WHERE invoice_number LIKE ?3)),
                ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            )
            "#,
        )
        .bind(&invoice_id)
        .bind(&prefix)
        .bind(&like)
        .bind(totals.subtotal_cents)
        .bind(totals.discount_cents)
        .bind(totals.tax_cents)
        .bind(totals.total_cents)
        .bind(&run.payment_method)
        .bind(run.payment_status)
        .bind(&run.folio_ref)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let invoice_number: String =
            sqlx::query_scalar("SELECT invoice_number FROM invoices WHERE id = ?1")
                .bind(&invoice_id)
                .fetch_one(&mut *tx)
                .await?;

        for item in &all_items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (
                    id, invoice_id, product_id, service_item_id,
                    name_snapshot, unit_price_cents, quantity,
                    line_total_cents, note, created_at
                ) VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&invoice_id)
            .bind(&item.service_item_id)
            .bind(&item.name_snapshot)
            .bind(item.unit_price_cents)
            .bind(item.quantity)
            .bind(item.total_price_cents)
            .bind(&item.note)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        insert_payments(&mut tx, &invoice_id, &run.payments, now).await?;

        for order_id in &run.order_ids {
            sqlx::query("INSERT INTO invoice_orders (invoice_id, order_id) VALUES (?1, ?2)")
                .bind(&invoice_id)
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            invoice_number = %invoice_number,
            orders = run.order_ids.len(),
            total_cents = totals.total_cents,
            "Orders billed"
        );

        Ok(Invoice {
            id: invoice_id,
            invoice_number,
            subtotal_cents: totals.subtotal_cents,
            discount_cents: totals.discount_cents,
            tax_cents: totals.tax_cents,
            total_cents: totals.total_cents,
            payment_method: run.payment_method,
            payment_status: run.payment_status,
            folio_ref: run.folio_ref,
            created_at: now,
        })
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Builds the `"KIND-YYYYMMDD-"` prefix and its LIKE pattern for today's
/// document counter.
fn document_prefix(kind: &str) -> (String, String) {
    let date_part = Utc::now().format("%Y%m%d");
    let prefix = format!("{kind}-{date_part}-");
    let like = format!("{prefix}%");
    (prefix, like)
}

/// Materializes order item rows from line drafts.
fn build_order_items(
    order_id: &str,
    lines: &[OrderLine],
    now: chrono::DateTime<Utc>,
) -> Vec<OrderItem> {
    lines
        .iter()
        .map(|line| OrderItem {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            service_item_id: line.service_item_id.clone(),
            name_snapshot: line.name_snapshot.clone(),
            station: line.station,
            unit_price_cents: line.unit_price_cents,
            quantity: line.quantity,
            note: line.note.clone(),
            total_price_cents: line.unit_price_cents * line.quantity,
            stock_product_id: line.stock_product_id.clone(),
            created_at: now,
        })
        .collect()
}

/// Aggregates per-product stock demand across item snapshots.
/// BTreeMap keeps draw order deterministic.
fn aggregate_demands(items: &[OrderItem]) -> BTreeMap<String, i64> {
    let mut demands = BTreeMap::new();
    for item in items {
        if let Some(product_id) = &item.stock_product_id {
            *demands.entry(product_id.clone()).or_insert(0) += item.quantity;
        }
    }
    demands
}

/// Draws `quantity` units of a product inside an open transaction:
/// replans FEFO against live rows, conditionally decrements each lot,
/// writes the `out` movements and applies the cache delta.
async fn draw_stock(
    tx: &mut Tx<'_>,
    product_id: &str,
    quantity: i64,
    reason: &str,
    reference_id: &str,
) -> DbResult<()> {
    let sql = format!(
        r#"
        SELECT {BATCH_COLUMNS} FROM product_batches
        WHERE product_id = ?1 AND quantity > 0
        ORDER BY {FEFO_ORDER}
        "#
    );

    let batches = sqlx::query_as::<_, ProductBatch>(&sql)
        .bind(product_id)
        .fetch_all(&mut **tx)
        .await?;

    let plan = plan_fefo(product_id, &batches, quantity);
    if !plan.can_fulfill() {
        return Err(DbError::InsufficientStock {
            product_id: product_id.to_string(),
            available: plan.available,
            requested: quantity,
        });
    }

    for allocation in &plan.allocations {
        let result = sqlx::query(
            r#"
            UPDATE product_batches SET quantity = quantity - ?2
            WHERE id = ?1 AND quantity >= ?2
            "#,
        )
        .bind(&allocation.batch_id)
        .bind(allocation.quantity)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::StockConflict {
                product_id: product_id.to_string(),
                batch_id: allocation.batch_id.clone(),
            });
        }

        insert_movement(
            tx,
            product_id,
            Some(&allocation.batch_id),
            allocation.quantity,
            MovementKind::Out,
            reason,
            Some(reference_id),
        )
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE products SET stock_quantity = stock_quantity - ?2, updated_at = ?3
        WHERE id = ?1
        "#,
    )
    .bind(product_id)
    .bind(quantity)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Inserts tender rows for an invoice.
async fn insert_payments(
    tx: &mut Tx<'_>,
    invoice_id: &str,
    payments: &[TenderLine],
    now: chrono::DateTime<Utc>,
) -> DbResult<()> {
    for payment in payments {
        sqlx::query(
            r#"
            INSERT INTO invoice_payments (
                id, invoice_id, method, amount_cents,
                tendered_cents, change_cents, reference, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(invoice_id)
        .bind(payment.method)
        .bind(payment.amount_cents)
        .bind(payment.tendered_cents)
        .bind(payment.change_cents)
        .bind(&payment.reference)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Inserts order item rows.
async fn insert_order_items(tx: &mut Tx<'_>, items: &[OrderItem]) -> DbResult<()> {
    for item in items {
        sqlx::query(
            r#"
            INSERT INTO order_items (
                id, order_id, service_item_id, name_snapshot, station,
                unit_price_cents, quantity, note, total_price_cents,
                stock_product_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&item.id)
        .bind(&item.order_id)
        .bind(&item.service_item_id)
        .bind(&item.name_snapshot)
        .bind(item.station)
        .bind(item.unit_price_cents)
        .bind(item.quantity)
        .bind(&item.note)
        .bind(item.total_price_cents)
        .bind(&item.stock_product_id)
        .bind(item.created_at)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Reads one order row inside an open transaction.
async fn fetch_order_row(tx: &mut Tx<'_>, order_id: &str) -> DbResult<OrderRow> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");

    let row = sqlx::query_as::<_, OrderRow>(&sql)
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?;

    row.ok_or_else(|| DbError::not_found("Order", order_id))
}

/// Reads all items of an order inside an open transaction.
async fn fetch_order_items(tx: &mut Tx<'_>, order_id: &str) -> DbResult<Vec<OrderItem>> {
    let sql = format!(
        r#"
        SELECT {ORDER_ITEM_COLUMNS} FROM order_items
        WHERE order_id = ?1
        ORDER BY created_at, id
        "#
    );

    let items = sqlx::query_as::<_, OrderItem>(&sql)
        .bind(order_id)
        .fetch_all(&mut **tx)
        .await?;

    Ok(items)
}

/// Reads the `out` movements an order caused, oldest first.
async fn fetch_out_movements(tx: &mut Tx<'_>, order_id: &str) -> DbResult<Vec<StockMovement>> {
    let sql = format!(
        r#"
        SELECT {MOVEMENT_COLUMNS} FROM stock_movements
        WHERE reference_id = ?1 AND movement = 'out'
        ORDER BY created_at, id
        "#
    );

    let movements = sqlx::query_as::<_, StockMovement>(&sql)
        .bind(order_id)
        .fetch_all(&mut **tx)
        .await?;

    Ok(movements)
}

/// Resolves why a guarded order update matched zero rows.
async fn order_guard_error(tx: &mut Tx<'_>, order_id: &str) -> DbResult<DbError> {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE id = ?1")
        .bind(order_id)
        .fetch_one(&mut **tx)
        .await?;

    if exists == 0 {
        Ok(DbError::not_found("Order", order_id))
    } else {
        Ok(DbError::StatusConflict {
            order_id: order_id.to_string(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use bazaar_core::{Product, ServiceItem, TenderType};
    use chrono::NaiveDate;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    async fn seed_product(db: &Database, id: &str, sku: &str) {
        let now = Utc::now();
        db.products()
            .insert(&Product {
                id: id.to_string(),
                sku: sku.to_string(),
                name: format!("Product {sku}"),
                purchase_price_cents: 4000,
                selling_price_cents: 10000,
                stock_quantity: 0,
                min_stock_threshold: 2,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    async fn seed_service(db: &Database, id: &str, name: &str, linked: Option<&str>) {
        let now = Utc::now();
        db.service_items()
            .insert(&ServiceItem {
                id: id.to_string(),
                name: name.to_string(),
                station: Station::Kitchen,
                selling_price_cents: 4000,
                linked_product_id: linked.map(str::to_string),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    fn cash_line(amount_cents: i64) -> TenderLine {
        TenderLine {
            method: TenderType::Cash,
            amount_cents,
            tendered_cents: Some(amount_cents),
            change_cents: Some(0),
            reference: None,
        }
    }

    fn sale_commit(product_id: &str, quantity: i64, unit_price_cents: i64) -> SaleCommit {
        let totals = SaleTotals {
            subtotal_cents: unit_price_cents * quantity,
            discount_cents: 0,
            tax_cents: 0,
            total_cents: unit_price_cents * quantity,
        };
        SaleCommit {
            lines: vec![SaleLine {
                product_id: Some(product_id.to_string()),
                service_item_id: None,
                name_snapshot: "Test line".to_string(),
                unit_price_cents,
                quantity,
                note: None,
            }],
            totals,
            payment_method: "cash".to_string(),
            payments: vec![cash_line(totals.total_cents)],
            payment_status: PaymentStatus::Paid,
            folio_ref: None,
            stock_demands: vec![(product_id.to_string(), quantity)],
        }
    }

    fn order_line(service_item_id: &str, quantity: i64, stock: Option<&str>) -> OrderLine {
        OrderLine {
            service_item_id: service_item_id.to_string(),
            name_snapshot: "Dal Makhani".to_string(),
            station: Station::Kitchen,
            unit_price_cents: 4000,
            quantity,
            note: None,
            stock_product_id: stock.map(str::to_string),
        }
    }

    fn table_draft(lines: Vec<OrderLine>) -> OrderDraft {
        OrderDraft {
            context: ServiceContext::Table("7".to_string()),
            waiter_id: "w1".to_string(),
            waiter_name: "Asha".to_string(),
            tax_rate_bps: 0,
            discount_bps: 0,
            lines,
        }
    }

    #[tokio::test]
    async fn test_commit_sale_spans_batches_in_fefo_order() {
        let db = test_db().await;
        seed_product(&db, "p1", "RICE").await;

        let early = db
            .stock()
            .receive_batch(
                "p1",
                "LOT-A",
                5,
                4000,
                10000,
                Some(NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()),
            )
            .await
            .unwrap();
        let late = db
            .stock()
            .receive_batch(
                "p1",
                "LOT-B",
                10,
                4000,
                10000,
                Some(NaiveDate::from_ymd_opt(2026, 10, 1).unwrap()),
            )
            .await
            .unwrap();

        let invoice = db.checkout().commit_sale(sale_commit("p1", 6, 10000)).await.unwrap();

        assert!(invoice.invoice_number.starts_with("INV-"));
        assert!(invoice.invoice_number.ends_with("-0001"));
        assert_eq!(invoice.total_cents, 60000);

        // Earliest expiry drained first, remainder from the later lot
        let early_left = db.batches().get_by_id(&early.id).await.unwrap().unwrap();
        let late_left = db.batches().get_by_id(&late.id).await.unwrap().unwrap();
        assert_eq!(early_left.quantity, 0);
        assert_eq!(late_left.quantity, 9);

        let product = db.products().get_by_id("p1").await.unwrap().unwrap();
        assert_eq!(product.stock_quantity, 9);

        let moves = db.stock().movements_for_reference(&invoice.id).await.unwrap();
        assert_eq!(moves.len(), 2);
        assert!(moves.iter().all(|m| m.movement == MovementKind::Out));
        assert_eq!(moves.iter().map(|m| m.quantity).sum::<i64>(), 6);

        let items = db.invoices().get_items(&invoice.id).await.unwrap();
        assert_eq!(items.len(), 1);
        let payments = db.invoices().get_payments(&invoice.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].method, TenderType::Cash);
    }

    #[tokio::test]
    async fn test_commit_sale_shortage_rolls_back_everything() {
        let db = test_db().await;
        seed_product(&db, "p1", "RICE").await;
        db.stock()
            .receive_batch("p1", "LOT-A", 15, 4000, 10000, None)
            .await
            .unwrap();

        let err = db
            .checkout()
            .commit_sale(sale_commit("p1", 20, 10000))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::InsufficientStock {
                available: 15,
                requested: 20,
                ..
            }
        ));

        // Nothing landed: no invoice, stock untouched, ledger has only the intake
        assert!(db.invoices().latest().await.unwrap().is_none());
        let product = db.products().get_by_id("p1").await.unwrap().unwrap();
        assert_eq!(product.stock_quantity, 15);
        let moves = db.stock().movements_for_product("p1", 50).await.unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].movement, MovementKind::In);
    }

    #[tokio::test]
    async fn test_sequential_sales_never_oversell() {
        let db = test_db().await;
        seed_product(&db, "p1", "RICE").await;
        db.stock()
            .receive_batch("p1", "LOT-A", 10, 4000, 10000, None)
            .await
            .unwrap();

        db.checkout().commit_sale(sale_commit("p1", 7, 10000)).await.unwrap();

        let err = db
            .checkout()
            .commit_sale(sale_commit("p1", 7, 10000))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InsufficientStock { available: 3, .. }));

        assert_eq!(db.batches().available_quantity("p1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_invoice_numbers_increment_within_a_day() {
        let db = test_db().await;
        seed_product(&db, "p1", "RICE").await;
        db.stock()
            .receive_batch("p1", "LOT-A", 10, 4000, 10000, None)
            .await
            .unwrap();

        let first = db.checkout().commit_sale(sale_commit("p1", 2, 10000)).await.unwrap();
        let second = db.checkout().commit_sale(sale_commit("p1", 3, 10000)).await.unwrap();

        assert!(first.invoice_number.ends_with("-0001"));
        assert!(second.invoice_number.ends_with("-0002"));
    }

    #[tokio::test]
    async fn test_place_order_draws_stock_at_placement() {
        let db = test_db().await;
        seed_product(&db, "p1", "LIME").await;
        db.stock()
            .receive_batch("p1", "LOT-A", 10, 1000, 2000, None)
            .await
            .unwrap();
        seed_service(&db, "s1", "Fresh Lime Soda", Some("p1")).await;

        let order = db
            .checkout()
            .place_order(table_draft(vec![order_line("s1", 4, Some("p1"))]))
            .await
            .unwrap();

        assert!(order.order_number.starts_with("ORD-"));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.subtotal_cents, 16000);
        assert_eq!(order.total_cents, 16000);

        assert_eq!(db.batches().available_quantity("p1").await.unwrap(), 6);

        let moves = db.stock().movements_for_reference(&order.id).await.unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].reason, "order");
        assert_eq!(moves[0].quantity, 4);
    }

    #[tokio::test]
    async fn test_place_order_shortage_rolls_back_order() {
        let db = test_db().await;
        seed_product(&db, "p1", "LIME").await;
        db.stock()
            .receive_batch("p1", "LOT-A", 2, 1000, 2000, None)
            .await
            .unwrap();
        seed_service(&db, "s1", "Fresh Lime Soda", Some("p1")).await;

        let err = db
            .checkout()
            .place_order(table_draft(vec![order_line("s1", 4, Some("p1"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InsufficientStock { .. }));

        assert!(db.orders().list_open().await.unwrap().is_empty());
        assert_eq!(db.batches().available_quantity("p1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_items_redraws_and_retotals() {
        let db = test_db().await;
        seed_product(&db, "p1", "LIME").await;
        db.stock()
            .receive_batch("p1", "LOT-A", 10, 1000, 2000, None)
            .await
            .unwrap();
        seed_service(&db, "s1", "Fresh Lime Soda", Some("p1")).await;
        seed_service(&db, "s2", "Dal Makhani", None).await;

        let order = db
            .checkout()
            .place_order(table_draft(vec![order_line("s1", 2, Some("p1"))]))
            .await
            .unwrap();
        assert_eq!(order.subtotal_cents, 8000);

        let updated = db
            .checkout()
            .append_items(&order.id, vec![order_line("s2", 1, None), order_line("s1", 1, Some("p1"))])
            .await
            .unwrap();

        assert_eq!(updated.subtotal_cents, 16000);
        assert_eq!(updated.total_cents, 16000);
        assert_eq!(db.orders().get_items(&order.id).await.unwrap().len(), 3);
        assert_eq!(db.batches().available_quantity("p1").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_order_restocks_original_lots() {
        let db = test_db().await;
        seed_product(&db, "p1", "LIME").await;
        db.stock()
            .receive_batch("p1", "LOT-A", 10, 1000, 2000, None)
            .await
            .unwrap();
        seed_service(&db, "s1", "Fresh Lime Soda", Some("p1")).await;

        let order = db
            .checkout()
            .place_order(table_draft(vec![order_line("s1", 4, Some("p1"))]))
            .await
            .unwrap();
        assert_eq!(db.batches().available_quantity("p1").await.unwrap(), 6);

        let cancelled = db.checkout().cancel_order(&order.id).await.unwrap();
        assert_eq!(cancelled.order_number, order.order_number);

        assert_eq!(db.batches().available_quantity("p1").await.unwrap(), 10);
        let product = db.products().get_by_id("p1").await.unwrap().unwrap();
        assert_eq!(product.stock_quantity, 10);

        let moves = db.stock().movements_for_reference(&order.id).await.unwrap();
        let outs = moves.iter().filter(|m| m.movement == MovementKind::Out).count();
        let ins = moves.iter().filter(|m| m.movement == MovementKind::In).count();
        assert_eq!(outs, 1);
        assert_eq!(ins, 1);

        // Already closed: a second cancel is a conflict
        let err = db.checkout().cancel_order(&order.id).await.unwrap_err();
        assert!(matches!(err, DbError::StatusConflict { .. }));
    }

    #[tokio::test]
    async fn test_bill_orders_combines_into_one_invoice() {
        let db = test_db().await;
        seed_service(&db, "s1", "Dal Makhani", None).await;

        let first = db
            .checkout()
            .place_order(table_draft(vec![order_line("s1", 2, None)]))
            .await
            .unwrap();
        let second = db
            .checkout()
            .place_order(table_draft(vec![order_line("s1", 3, None)]))
            .await
            .unwrap();

        let invoice = db
            .checkout()
            .bill_orders(BillingRun {
                order_ids: vec![first.id.clone(), second.id.clone()],
                payment_method: "cash".to_string(),
                payments: vec![cash_line(first.total_cents + second.total_cents)],
                payment_status: PaymentStatus::Paid,
                folio_ref: None,
            })
            .await
            .unwrap();

        assert_eq!(invoice.subtotal_cents, 20000);
        assert_eq!(invoice.total_cents, 20000);

        let items = db.invoices().get_items(&invoice.id).await.unwrap();
        assert_eq!(items.len(), 2);

        let mut billed = db.invoices().billed_order_ids(&invoice.id).await.unwrap();
        billed.sort();
        let mut expected = vec![first.id.clone(), second.id.clone()];
        expected.sort();
        assert_eq!(billed, expected);

        for id in [&first.id, &second.id] {
            let order = db.orders().get_by_id(id).await.unwrap().unwrap();
            assert_eq!(order.status, OrderStatus::Billed);
            assert!(order.is_billed);
        }

        // Billing an already billed order fails loudly
        let err = db
            .checkout()
            .bill_orders(BillingRun {
                order_ids: vec![first.id.clone()],
                payment_method: "cash".to_string(),
                payments: vec![cash_line(first.total_cents)],
                payment_status: PaymentStatus::Paid,
                folio_ref: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::BillingConflict { .. }));
    }

    #[tokio::test]
    async fn test_billing_does_not_touch_stock() {
        let db = test_db().await;
        seed_product(&db, "p1", "LIME").await;
        db.stock()
            .receive_batch("p1", "LOT-A", 10, 1000, 2000, None)
            .await
            .unwrap();
        seed_service(&db, "s1", "Fresh Lime Soda", Some("p1")).await;

        let order = db
            .checkout()
            .place_order(table_draft(vec![order_line("s1", 4, Some("p1"))]))
            .await
            .unwrap();
        let before = db.stock().movements_for_product("p1", 50).await.unwrap().len();

        db.checkout()
            .bill_orders(BillingRun {
                order_ids: vec![order.id.clone()],
                payment_method: "cash".to_string(),
                payments: vec![cash_line(order.total_cents)],
                payment_status: PaymentStatus::Paid,
                folio_ref: None,
            })
            .await
            .unwrap();

        let after = db.stock().movements_for_product("p1", 50).await.unwrap().len();
        assert_eq!(before, after);
        assert_eq!(db.batches().available_quantity("p1").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_bill_cancelled_order_conflicts() {
        let db = test_db().await;
        seed_service(&db, "s1", "Dal Makhani", None).await;

        let order = db
            .checkout()
            .place_order(table_draft(vec![order_line("s1", 2, None)]))
            .await
            .unwrap();
        db.checkout().cancel_order(&order.id).await.unwrap();

        let err = db
            .checkout()
            .bill_orders(BillingRun {
                order_ids: vec![order.id.clone()],
                payment_method: "cash".to_string(),
                payments: vec![cash_line(order.total_cents)],
                payment_status: PaymentStatus::Paid,
                folio_ref: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::BillingConflict { .. }));
    }

    #[tokio::test]
    async fn test_room_charge_commits_pending_then_settles() {
        let db = test_db().await;
        seed_product(&db, "p1", "RICE").await;
        db.stock()
            .receive_batch("p1", "LOT-A", 10, 4000, 10000, None)
            .await
            .unwrap();

        let mut commit = sale_commit("p1", 2, 10000);
        commit.payment_method = "room_charge".to_string();
        commit.payments = vec![TenderLine {
            method: TenderType::RoomCharge,
            amount_cents: commit.totals.total_cents,
            tendered_cents: None,
            change_cents: None,
            reference: Some("F-204".to_string()),
        }];
        commit.payment_status = PaymentStatus::Pending;
        commit.folio_ref = Some("F-204".to_string());

        let invoice = db.checkout().commit_sale(commit).await.unwrap();
        assert_eq!(invoice.payment_status, PaymentStatus::Pending);
        assert_eq!(invoice.folio_ref.as_deref(), Some("F-204"));

        let pending = db.invoices().list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);

        db.invoices().mark_paid(&invoice.id).await.unwrap();
        let reloaded = db.invoices().get_by_id(&invoice.id).await.unwrap().unwrap();
        assert_eq!(reloaded.payment_status, PaymentStatus::Paid);

        // Double settlement is visible
        let err = db.invoices().mark_paid(&invoice.id).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
