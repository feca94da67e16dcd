//! # Invoice Repository
//!
//! Reads and settlement updates for committed invoices.
//!
//! Invoices are written only by the checkout committer and are immutable
//! afterwards, with one exception: a room-charged invoice moves from
//! `pending` to `paid` when the folio settles.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use bazaar_core::{Invoice, InvoiceItem, InvoicePayment};

/// Columns selected for every invoice read.
pub(crate) const INVOICE_COLUMNS: &str = r#"
    id, invoice_number, subtotal_cents, discount_cents,
    tax_cents, total_cents, payment_method, payment_status,
    folio_ref, created_at
"#;

/// Repository for invoice database operations.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    /// Gets an invoice by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Invoice>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1");

        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invoice)
    }

    /// Gets an invoice by its document number.
    pub async fn get_by_number(&self, invoice_number: &str) -> DbResult<Option<Invoice>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_number = ?1");

        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(invoice_number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invoice)
    }

    /// Gets the most recently committed invoice. Drives receipt reprints.
    pub async fn latest(&self) -> DbResult<Option<Invoice>> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY created_at DESC, id DESC LIMIT 1"
        );

        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invoice)
    }

    /// Gets all line items of an invoice.
    pub async fn get_items(&self, invoice_id: &str) -> DbResult<Vec<InvoiceItem>> {
        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT id, invoice_id, product_id, service_item_id,
                   name_snapshot, unit_price_cents, quantity,
                   line_total_cents, note, created_at
            FROM invoice_items
            WHERE invoice_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Gets all tender rows of an invoice.
    pub async fn get_payments(&self, invoice_id: &str) -> DbResult<Vec<InvoicePayment>> {
        let payments = sqlx::query_as::<_, InvoicePayment>(
            r#"
            SELECT id, invoice_id, method, amount_cents,
                   tendered_cents, change_cents, reference, created_at
            FROM invoice_payments
            WHERE invoice_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    /// Gets the IDs of the orders a combined invoice billed.
    pub async fn billed_order_ids(&self, invoice_id: &str) -> DbResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT order_id FROM invoice_orders WHERE invoice_id = ?1 ORDER BY order_id",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Lists room-charged invoices still awaiting folio settlement.
    pub async fn list_pending(&self) -> DbResult<Vec<Invoice>> {
        let sql = format!(
            r#"
            SELECT {INVOICE_COLUMNS} FROM invoices
            WHERE payment_status = 'pending'
            ORDER BY created_at
            "#
        );

        let invoices = sqlx::query_as::<_, Invoice>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(invoices)
    }

    /// Marks a pending invoice as paid.
    ///
    /// Guarded on `payment_status = 'pending'` so a double settlement is a
    /// visible error, not a silent no-op.
    pub async fn mark_paid(&self, invoice_id: &str) -> DbResult<()> {
        debug!(invoice_id = %invoice_id, "Marking invoice paid");

        let result = sqlx::query(
            r#"
            UPDATE invoices SET payment_status = 'paid'
            WHERE id = ?1 AND payment_status = 'pending'
            "#,
        )
        .bind(invoice_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Invoice (pending)", invoice_id));
        }

        Ok(())
    }
}
