//! # Domain Types
//!
//! Core domain types used throughout Bazaar POS.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │  ProductBatch   │   │ StockMovement   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  sku (business) │   │  product_id(FK) │   │  movement kind  │       │
//! │  │  stock_quantity │   │  expiry_date    │   │  reference_id   │       │
//! │  │  (cached total) │   │  quantity >= 0  │   │  (append-only)  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   ServiceItem   │   │    Invoice      │   │ InvoicePayment  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  station route  │   │  invoice_number │   │  tender method  │       │
//! │  │  linked_product │   │  totals snapshot│   │  amount_cents   │       │
//! │  │  (mirror ref)   │   │  payment_status │   │  change_cents   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID: (sku, batch_number, invoice_number, ...) - human-readable
//!
//! ## Stock Ownership
//! `Product.stock_quantity` is a cached aggregate; the authoritative per-lot
//! quantities live in `ProductBatch.quantity`. A `ServiceItem` never owns
//! stock: when `linked_product_id` is set, availability and every decrement
//! go through that product's batches.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 1800 bps = 18% (e.g., standard GST rate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Creates a tax rate from a percentage (for convenience).
    pub fn from_percentage(pct: f64) -> Self {
        TaxRate((pct * 100.0).round() as u32)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Product
// =============================================================================

/// A stock-owning product (warehouse/shop floor article).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Display name shown to cashier and on receipt.
    pub name: String,

    /// Purchase (cost) price in cents.
    pub purchase_price_cents: i64,

    /// Current selling price in cents.
    pub selling_price_cents: i64,

    /// Cached total stock across all batches.
    /// Authoritative quantities live in `ProductBatch`; this column is
    /// refreshed in the same transaction as every batch mutation.
    pub stock_quantity: i64,

    /// Reorder alert threshold.
    pub min_stock_threshold: i64,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    /// When the product was created.
    pub created_at: DateTime<Utc>,

    /// When the product was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the selling price as Money.
    #[inline]
    pub fn selling_price(&self) -> Money {
        Money::from_cents(self.selling_price_cents)
    }

    /// Returns the purchase price as Money.
    #[inline]
    pub fn purchase_price(&self) -> Money {
        Money::from_cents(self.purchase_price_cents)
    }

    /// Checks whether the cached stock has fallen to the reorder threshold.
    #[inline]
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.min_stock_threshold
    }
}

// =============================================================================
// Product Batch
// =============================================================================

/// A received lot of a product: one purchase price, one optional expiry.
///
/// Invariant: `quantity >= 0`, enforced by the conditional decrement the
/// committer uses (`... AND quantity >= :n`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductBatch {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Owning product. A batch belongs to exactly one product.
    pub product_id: String,

    /// Supplier/GRN lot number - business identifier.
    pub batch_number: String,

    /// Units remaining in this batch. Decremented on sale, never negative.
    pub quantity: i64,

    /// Purchase price for this lot in cents.
    pub purchase_price_cents: i64,

    /// Selling price for this lot in cents (may differ from the product's
    /// current list price).
    pub selling_price_cents: i64,

    /// Expiry date, if the lot is perishable. `None` sorts last in FEFO.
    pub expiry_date: Option<NaiveDate>,

    /// When the lot was received.
    pub received_at: DateTime<Utc>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

impl ProductBatch {
    /// Returns the lot selling price as Money.
    #[inline]
    pub fn selling_price(&self) -> Money {
        Money::from_cents(self.selling_price_cents)
    }

    /// Checks whether the lot still has units to draw.
    #[inline]
    pub fn has_stock(&self) -> bool {
        self.quantity > 0
    }
}

// =============================================================================
// Service Item
// =============================================================================

/// Preparation station a service item is routed to on kitchen tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum Station {
    /// Food preparation.
    Kitchen,
    /// Drinks.
    Bar,
}

/// A menu/service item (restaurant dish, bar drink, room service article).
///
/// Service items do not own stock. When `linked_product_id` is set the item
/// mirrors a warehouse product and every sale draws from that product's
/// batches; displayed availability is derived, never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ServiceItem {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name shown on tickets and receipts.
    pub name: String,

    /// Ticket routing station.
    pub station: Station,

    /// Selling price in cents.
    pub selling_price_cents: i64,

    /// Non-owning mirror reference to a stock-tracked product.
    pub linked_product_id: Option<String>,

    /// Whether the item is active (soft delete).
    pub is_active: bool,

    /// When the item was created.
    pub created_at: DateTime<Utc>,

    /// When the item was last updated.
    pub updated_at: DateTime<Utc>,
}

impl ServiceItem {
    /// Returns the selling price as Money.
    #[inline]
    pub fn selling_price(&self) -> Money {
        Money::from_cents(self.selling_price_cents)
    }

    /// Checks whether sales of this item draw physical stock.
    #[inline]
    pub fn tracks_stock(&self) -> bool {
        self.linked_product_id.is_some()
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// Direction/kind of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Stock received (batch intake, cancellation restock).
    In,
    /// Stock sold or drawn by an order.
    Out,
    /// Manual correction (stocktake, damage, shrinkage).
    Adjustment,
}

/// An append-only stock movement fact.
///
/// Never mutated or deleted; the audit trail for every quantity change.
/// `reference_id` resolves to the invoice or order that caused the movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Product whose stock moved.
    pub product_id: String,

    /// Batch the units came from/went to, when known.
    pub batch_id: Option<String>,

    /// Units moved. Positive for `in`/`out` rows (direction comes from
    /// `movement`); adjustment rows carry the signed delta.
    pub quantity: i64,

    /// Direction/kind of the movement.
    pub movement: MovementKind,

    /// Human-readable cause ("sale", "order", "batch received", ...).
    pub reason: String,

    /// Invoice or order id that caused the movement.
    pub reference_id: Option<String>,

    /// When the movement was recorded.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Tender
// =============================================================================

/// Tender methods accepted at the register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TenderType {
    /// Physical cash.
    Cash,
    /// Card on external terminal.
    Card,
    /// UPI transfer.
    Upi,
    /// Direct bank transfer.
    BankTransfer,
    /// Deferred settlement posted to a guest folio or customer credit.
    RoomCharge,
}

impl TenderType {
    /// Checks whether this tender defers settlement to a folio/credit ledger.
    #[inline]
    pub const fn is_deferred(&self) -> bool {
        matches!(self, TenderType::RoomCharge)
    }

    /// Stable lowercase label used in receipts and the serialized
    /// `payment_method` column.
    pub const fn label(&self) -> &'static str {
        match self {
            TenderType::Cash => "cash",
            TenderType::Card => "card",
            TenderType::Upi => "upi",
            TenderType::BankTransfer => "bank_transfer",
            TenderType::RoomCharge => "room_charge",
        }
    }
}

/// Settlement state of an invoice.
///
/// Invoices are immutable once committed except for this transition:
/// `Pending` (room charge awaiting folio settlement) → `Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Fully settled at commit time.
    Paid,
    /// Settlement deferred to a folio/credit ledger.
    Pending,
}

// =============================================================================
// Invoice
// =============================================================================

/// A committed sale document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Invoice {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Server-generated unique document number (`INV-YYYYMMDD-NNNN`).
    pub invoice_number: String,

    /// Sum of line totals in cents.
    pub subtotal_cents: i64,

    /// Discount amount in cents.
    pub discount_cents: i64,

    /// Tax amount in cents.
    pub tax_cents: i64,

    /// Grand total in cents.
    pub total_cents: i64,

    /// Single tender label, or `a+b` joined labels for split tenders.
    pub payment_method: String,

    /// Settlement state; `pending` when room-charged.
    pub payment_status: PaymentStatus,

    /// Folio/booking reference for room-charged invoices.
    pub folio_ref: Option<String>,

    /// When the invoice was committed.
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Returns the grand total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Returns the subtotal as Money.
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }
}

/// A line item on a committed invoice.
/// Uses snapshot pattern: name and unit price are frozen at sale time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InvoiceItem {
    pub id: String,
    pub invoice_id: String,
    /// Stock-owning product, when the line sold a product directly.
    pub product_id: Option<String>,
    /// Service item, when the line sold a menu/service article.
    pub service_item_id: Option<String>,
    /// Name at time of sale (frozen).
    pub name_snapshot: String,
    /// Unit price in cents at time of sale (frozen).
    pub unit_price_cents: i64,
    /// Quantity sold.
    pub quantity: i64,
    /// Line total (unit_price × quantity).
    pub line_total_cents: i64,
    /// Per-line note ("no onions").
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InvoiceItem {
    /// Returns the unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Returns the line total as Money.
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

/// One tender row of an invoice settlement.
/// An invoice has several rows in split-tender scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InvoicePayment {
    pub id: String,
    pub invoice_id: String,
    pub method: TenderType,
    /// Amount applied towards the total, in cents.
    pub amount_cents: i64,
    /// For cash: amount the customer handed over.
    pub tendered_cents: Option<i64>,
    /// For cash: change returned.
    pub change_cents: Option<i64>,
    /// External reference (card auth code, folio number, UPI txn id).
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InvoicePayment {
    /// Returns the applied amount as Money.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn product(stock: i64, threshold: i64) -> Product {
        Product {
            id: "p1".into(),
            sku: "SKU-1".into(),
            name: "Basmati Rice 5kg".into(),
            purchase_price_cents: 40000,
            selling_price_cents: 55000,
            stock_quantity: stock,
            min_stock_threshold: threshold,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_tax_rate_from_bps() {
        let rate = TaxRate::from_bps(1800);
        assert_eq!(rate.bps(), 1800);
        assert!((rate.percentage() - 18.0).abs() < 0.001);
    }

    #[test]
    fn test_tax_rate_from_percentage() {
        let rate = TaxRate::from_percentage(8.25);
        assert_eq!(rate.bps(), 825);
    }

    #[test]
    fn test_low_stock_threshold() {
        assert!(product(5, 5).is_low_stock());
        assert!(product(3, 5).is_low_stock());
        assert!(!product(6, 5).is_low_stock());
    }

    #[test]
    fn test_tender_labels() {
        assert_eq!(TenderType::Cash.label(), "cash");
        assert_eq!(TenderType::BankTransfer.label(), "bank_transfer");
        assert_eq!(TenderType::RoomCharge.label(), "room_charge");
    }

    #[test]
    fn test_deferred_tenders() {
        assert!(TenderType::RoomCharge.is_deferred());
        assert!(!TenderType::Cash.is_deferred());
        assert!(!TenderType::Upi.is_deferred());
    }

    #[test]
    fn test_service_item_stock_tracking() {
        let item = ServiceItem {
            id: "s1".into(),
            name: "Fresh Lime Soda".into(),
            station: Station::Bar,
            selling_price_cents: 8000,
            linked_product_id: Some("p1".into()),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(item.tracks_stock());

        let untracked = ServiceItem {
            linked_product_id: None,
            ..item
        };
        assert!(!untracked.tracks_stock());
    }
}
