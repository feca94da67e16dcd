//! # Cart Model
//!
//! The in-memory working state of a sale being built at a register.
//!
//! ## Cart Operations Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cart Operations                                      │
//! │                                                                         │
//! │  Register Action        Engine Operation         Cart Change            │
//! │  ───────────────        ────────────────         ───────────            │
//! │                                                                         │
//! │  Scan Product ─────────► add_product() ────────► merge or push line    │
//! │                                                                         │
//! │  Pick Menu Item ───────► add_service() ────────► merge or push line    │
//! │                                                                         │
//! │  Change Quantity ──────► update_quantity() ────► line.quantity = n     │
//! │                            (0 removes the line)                         │
//! │                                                                         │
//! │  Override Price ───────► update_price() ───────► line.unit_price = p   │
//! │                                                                         │
//! │  Remove / Clear ───────► remove_line()/clear()                         │
//! │                                                                         │
//! │  NOTE: availability against batches is the caller's check, run BEFORE  │
//! │  every quantity-changing mutation; the cart itself is pure bookkeeping │
//! │  and exposes `demand_for` so that check can aggregate mirror lines.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//! - Lines are unique by `LineRef` (re-adding merges quantities)
//! - Quantity is always > 0 (updating to 0 removes the line)
//! - Maximum lines: 100, maximum quantity per line: 999
//! - Prices are frozen at add time (snapshot pattern); later product price
//!   edits do not reprice an open cart

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Product, ServiceItem, TaxRate};
use crate::validation::{
    validate_cart_size, validate_note, validate_price_cents, validate_quantity,
};
use crate::{MAX_CART_LINES, MAX_LINE_QUANTITY};

// =============================================================================
// Line Identity
// =============================================================================

/// Identity of a cart line: the product or service item it sells.
///
/// Line identity is the catalog reference, not an item instance; adding the
/// same product twice grows one line instead of creating two.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum LineRef {
    /// A stock-owning product sold directly.
    Product(String),
    /// A menu/service item.
    Service(String),
}

impl LineRef {
    /// The referenced catalog id.
    pub fn id(&self) -> &str {
        match self {
            LineRef::Product(id) | LineRef::Service(id) => id,
        }
    }
}

impl fmt::Display for LineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineRef::Product(id) => write!(f, "product {id}"),
            LineRef::Service(id) => write!(f, "service {id}"),
        }
    }
}

// =============================================================================
// Cart Line
// =============================================================================

/// One line of the cart.
///
/// ## Design Notes
/// - `name` and `unit_price_cents` are frozen copies taken when the line was
///   added, so the register displays consistent data even if the catalog
///   changes underneath an open cart.
/// - `stock_product_id` is the product whose batches this line draws from:
///   the product itself for product lines, the mirror target for linked
///   service lines, `None` for untracked service lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    /// Line identity.
    pub line_ref: LineRef,

    /// Display name at time of adding (frozen).
    pub name: String,

    /// Unit price in cents at time of adding (frozen, overridable).
    pub unit_price_cents: i64,

    /// Quantity, always > 0.
    pub quantity: i64,

    /// Optional per-line note ("no onions").
    pub note: Option<String>,

    /// Stock-owning product this line draws from, if any.
    pub stock_product_id: Option<String>,

    /// When this line was added.
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    /// Creates a line selling a product directly.
    pub fn from_product(product: &Product, quantity: i64) -> Self {
        CartLine {
            line_ref: LineRef::Product(product.id.clone()),
            name: product.name.clone(),
            unit_price_cents: product.selling_price_cents,
            quantity,
            note: None,
            stock_product_id: Some(product.id.clone()),
            added_at: Utc::now(),
        }
    }

    /// Creates a line selling a service item. A mirror-linked item records
    /// its stock product so availability checks and commits draw from it.
    pub fn from_service(item: &ServiceItem, quantity: i64) -> Self {
        CartLine {
            line_ref: LineRef::Service(item.id.clone()),
            name: item.name.clone(),
            unit_price_cents: item.selling_price_cents,
            quantity,
            note: None,
            stock_product_id: item.linked_product_id.clone(),
            added_at: Utc::now(),
        }
    }

    /// Line total (unit price × quantity).
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * self.quantity
    }

    /// Line total as Money.
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents())
    }
}

// =============================================================================
// Totals
// =============================================================================

/// Derived totals of a cart or order, computed on read and never stored
/// while the sale is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTotals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

impl SaleTotals {
    /// Computes totals from a subtotal and the discount/tax parameters.
    ///
    /// `discount = subtotal × discount_bps`, `taxable = subtotal − discount`,
    /// `tax = taxable × rate` when enabled, `total = taxable + tax`.
    ///
    /// ## Example
    /// ```rust
    /// use bazaar_core::cart::SaleTotals;
    /// use bazaar_core::money::Money;
    /// use bazaar_core::types::TaxRate;
    ///
    /// let t = SaleTotals::compute(Money::from_cents(10000), 1000, TaxRate::from_bps(1800), true);
    /// assert_eq!(t.discount_cents, 1000); // 10%
    /// assert_eq!(t.tax_cents, 1620);      // 18% of 90.00
    /// assert_eq!(t.total_cents, 10620);
    /// ```
    pub fn compute(subtotal: Money, discount_bps: u32, tax_rate: TaxRate, tax_enabled: bool) -> Self {
        let discount = subtotal.percent_of(discount_bps);
        let taxable = subtotal - discount;
        let tax = if tax_enabled {
            taxable.calculate_tax(tax_rate)
        } else {
            Money::zero()
        };

        SaleTotals {
            subtotal_cents: subtotal.cents(),
            discount_cents: discount.cents(),
            tax_cents: tax.cents(),
            total_cents: (taxable + tax).cents(),
        }
    }

    /// Subtotal minus discount.
    #[inline]
    pub fn taxable_cents(&self) -> i64 {
        self.subtotal_cents - self.discount_cents
    }

    /// Grand total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Cart
// =============================================================================

/// The shopping cart of one register session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    /// Lines, unique by `LineRef`.
    pub lines: Vec<CartLine>,

    /// Whole-cart discount in basis points.
    pub discount_bps: u32,

    /// Tax rate applied to the discounted subtotal.
    pub tax_rate: TaxRate,

    /// Whether tax is applied at all.
    pub tax_enabled: bool,

    /// When the cart was created/last cleared.
    pub created_at: DateTime<Utc>,
}

impl Cart {
    /// Creates a new empty cart with the given tax parameters.
    pub fn new(tax_rate: TaxRate, tax_enabled: bool) -> Self {
        Cart {
            lines: Vec::new(),
            discount_bps: 0,
            tax_rate,
            tax_enabled,
            created_at: Utc::now(),
        }
    }

    /// Adds a product line or merges into the existing one.
    pub fn add_product(&mut self, product: &Product, quantity: i64) -> CoreResult<()> {
        validate_quantity(quantity)?;
        self.merge_or_push(CartLine::from_product(product, quantity))
    }

    /// Adds a service line or merges into the existing one.
    pub fn add_service(&mut self, item: &ServiceItem, quantity: i64) -> CoreResult<()> {
        validate_quantity(quantity)?;
        self.merge_or_push(CartLine::from_service(item, quantity))
    }

    fn merge_or_push(&mut self, line: CartLine) -> CoreResult<()> {
        if let Some(existing) = self.lines.iter_mut().find(|l| l.line_ref == line.line_ref) {
            let new_qty = existing.quantity + line.quantity;
            if new_qty > MAX_LINE_QUANTITY {
                return Err(CoreError::QuantityTooLarge {
                    requested: new_qty,
                    max: MAX_LINE_QUANTITY,
                });
            }
            existing.quantity = new_qty;
            return Ok(());
        }

        validate_cart_size(self.lines.len())?;
        self.lines.push(line);
        Ok(())
    }

    /// Sets the quantity of a line. Zero removes the line.
    pub fn update_quantity(&mut self, line_ref: &LineRef, quantity: i64) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_line(line_ref);
        }
        validate_quantity(quantity)?;

        let line = self.line_mut(line_ref)?;
        line.quantity = quantity;
        Ok(())
    }

    /// Overrides the unit price of a line (price negotiation, manual markdown).
    pub fn update_price(&mut self, line_ref: &LineRef, unit_price_cents: i64) -> CoreResult<()> {
        validate_price_cents(unit_price_cents)?;

        let line = self.line_mut(line_ref)?;
        line.unit_price_cents = unit_price_cents;
        Ok(())
    }

    /// Sets or clears the note on a line.
    pub fn set_note(&mut self, line_ref: &LineRef, note: Option<String>) -> CoreResult<()> {
        if let Some(ref text) = note {
            validate_note(text)?;
        }

        let line = self.line_mut(line_ref)?;
        line.note = note;
        Ok(())
    }

    /// Removes a line.
    pub fn remove_line(&mut self, line_ref: &LineRef) -> CoreResult<()> {
        let initial_len = self.lines.len();
        self.lines.retain(|l| &l.line_ref != line_ref);

        if self.lines.len() == initial_len {
            Err(CoreError::LineNotFound(line_ref.to_string()))
        } else {
            Ok(())
        }
    }

    /// Clears all lines; discount and tax parameters stay.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.created_at = Utc::now();
    }

    /// Sets the whole-cart discount.
    pub fn set_discount_bps(&mut self, discount_bps: u32) -> CoreResult<()> {
        crate::validation::validate_discount_bps(discount_bps)?;
        self.discount_bps = discount_bps;
        Ok(())
    }

    /// Looks up a line.
    pub fn line(&self, line_ref: &LineRef) -> Option<&CartLine> {
        self.lines.iter().find(|l| &l.line_ref == line_ref)
    }

    fn line_mut(&mut self, line_ref: &LineRef) -> CoreResult<&mut CartLine> {
        self.lines
            .iter_mut()
            .find(|l| &l.line_ref == line_ref)
            .ok_or_else(|| CoreError::LineNotFound(line_ref.to_string()))
    }

    /// Total units the cart demands from one stock-owning product, summed
    /// across direct product lines and mirror-linked service lines.
    ///
    /// Availability must be checked against this aggregate, not a single
    /// line's quantity: two lines drawing on the same product compete for
    /// the same batches.
    pub fn demand_for(&self, product_id: &str) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.stock_product_id.as_deref() == Some(product_id))
            .map(|l| l.quantity)
            .sum()
    }

    /// Aggregated stock demand per product, in first-seen order.
    /// This is what the committer turns into batch draws.
    pub fn stock_demands(&self) -> Vec<(String, i64)> {
        let mut demands: Vec<(String, i64)> = Vec::new();
        for line in &self.lines {
            let Some(product_id) = &line.stock_product_id else {
                continue;
            };
            match demands.iter_mut().find(|(id, _)| id == product_id) {
                Some((_, qty)) => *qty += line.quantity,
                None => demands.push((product_id.clone(), line.quantity)),
            }
        }
        demands
    }

    /// Number of distinct lines.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Total units across all lines.
    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Sum of line totals.
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.lines.iter().map(|l| l.line_total_cents()).sum())
    }

    /// Derived subtotal/discount/tax/total, computed on read.
    pub fn totals(&self) -> SaleTotals {
        SaleTotals::compute(self.subtotal(), self.discount_bps, self.tax_rate, self.tax_enabled)
    }

    /// Checks if the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Station;

    fn test_product(id: &str, price_cents: i64) -> Product {
        Product {
            id: id.to_string(),
            sku: format!("SKU-{id}"),
            name: format!("Product {id}"),
            purchase_price_cents: price_cents / 2,
            selling_price_cents: price_cents,
            stock_quantity: 100,
            min_stock_threshold: 5,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_service(id: &str, price_cents: i64, linked: Option<&str>) -> ServiceItem {
        ServiceItem {
            id: id.to_string(),
            name: format!("Dish {id}"),
            station: Station::Kitchen,
            selling_price_cents: price_cents,
            linked_product_id: linked.map(str::to_string),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cart() -> Cart {
        Cart::new(TaxRate::from_bps(1800), true)
    }

    #[test]
    fn test_add_same_product_merges_lines() {
        let mut cart = cart();
        let product = test_product("p1", 999);

        cart.add_product(&product, 2).unwrap();
        cart.add_product(&product, 3).unwrap();

        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.total_quantity(), 5);
    }

    #[test]
    fn test_product_and_service_lines_are_distinct() {
        let mut cart = cart();
        cart.add_product(&test_product("x", 1000), 1).unwrap();
        cart.add_service(&test_service("x", 1500, None), 1).unwrap();

        assert_eq!(cart.line_count(), 2);
    }

    #[test]
    fn test_totals_match_percentage_math() {
        let mut cart = cart();
        cart.add_product(&test_product("p1", 10000), 1).unwrap();
        cart.set_discount_bps(1000).unwrap();

        // subtotal 100.00, 10% discount, 18% tax on 90.00
        let totals = cart.totals();
        assert_eq!(totals.subtotal_cents, 10000);
        assert_eq!(totals.discount_cents, 1000);
        assert_eq!(totals.taxable_cents(), 9000);
        assert_eq!(totals.tax_cents, 1620);
        assert_eq!(totals.total_cents, 10620);
    }

    #[test]
    fn test_totals_with_tax_disabled() {
        let mut cart = Cart::new(TaxRate::from_bps(1800), false);
        cart.add_product(&test_product("p1", 10000), 1).unwrap();
        cart.set_discount_bps(1000).unwrap();

        let totals = cart.totals();
        assert_eq!(totals.tax_cents, 0);
        assert_eq!(totals.total_cents, 9000);
    }

    #[test]
    fn test_update_quantity_zero_removes_line() {
        let mut cart = cart();
        let product = test_product("p1", 500);
        cart.add_product(&product, 2).unwrap();

        let line_ref = LineRef::Product("p1".into());
        cart.update_quantity(&line_ref, 0).unwrap();
        assert!(cart.is_empty());

        // Further updates on the removed line fail
        assert!(matches!(
            cart.update_quantity(&line_ref, 1),
            Err(CoreError::LineNotFound(_))
        ));
    }

    #[test]
    fn test_update_price_override() {
        let mut cart = cart();
        cart.add_product(&test_product("p1", 1000), 3).unwrap();

        let line_ref = LineRef::Product("p1".into());
        cart.update_price(&line_ref, 850).unwrap();
        assert_eq!(cart.subtotal().cents(), 2550);

        assert!(cart.update_price(&line_ref, -1).is_err());
    }

    #[test]
    fn test_quantity_cap_on_merge() {
        let mut cart = cart();
        let product = test_product("p1", 100);
        cart.add_product(&product, 900).unwrap();

        let err = cart.add_product(&product, 100).unwrap_err();
        assert!(matches!(err, CoreError::QuantityTooLarge { .. }));
        assert_eq!(cart.total_quantity(), 900);
    }

    #[test]
    fn test_line_cap() {
        let mut cart = cart();
        for i in 0..MAX_CART_LINES {
            cart.add_product(&test_product(&format!("p{i}"), 100), 1).unwrap();
        }

        let err = cart.add_product(&test_product("overflow", 100), 1).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_demand_aggregates_mirror_lines() {
        let mut cart = cart();
        let product = test_product("p1", 1000);
        // Lime soda mirrors the lime crate product
        let mirrored = test_service("s1", 1500, Some("p1"));
        let untracked = test_service("s2", 2000, None);

        cart.add_product(&product, 2).unwrap();
        cart.add_service(&mirrored, 3).unwrap();
        cart.add_service(&untracked, 4).unwrap();

        assert_eq!(cart.demand_for("p1"), 5);
        assert_eq!(cart.stock_demands(), vec![("p1".to_string(), 5)]);
    }

    #[test]
    fn test_clear_keeps_parameters() {
        let mut cart = cart();
        cart.add_product(&test_product("p1", 100), 1).unwrap();
        cart.set_discount_bps(500).unwrap();

        cart.clear();
        assert!(cart.is_empty());
        assert_eq!(cart.discount_bps, 500);
        assert!(cart.tax_enabled);
    }
}
