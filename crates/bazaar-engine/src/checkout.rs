//! # Checkout Service
//!
//! Drives a direct sale from an empty cart to a committed invoice: catalog
//! lookups, availability checks, tendering and the collaborator handoffs
//! around the commit.
//!
//! ## Commit Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Who Moves First                                    │
//! │                                                                         │
//! │  1. charge_to_folio   → PMS ledger       (can refuse; nothing local    │
//! │                                           has happened yet)            │
//! │  2. commit_sale       → SQLite, one tx   (can fail; the posted folio   │
//! │                                           charge is reversed)          │
//! │  3. receipt dispatch  → printer sink     (can fail; logged WARN, the   │
//! │                                           sale stands)                 │
//! │                                                                         │
//! │  The collaborator that can refuse runs before the local commit; the    │
//! │  one that only renders runs after it.                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Availability Checks
//! Every cart mutation that grows demand re-checks batch availability for
//! the product it draws from, so the cashier hears about a shortage while
//! scanning, not at payment time. The committer re-validates inside its
//! transaction regardless: the shopping-phase check is advisory, the
//! in-transaction check is the enforcement.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use bazaar_core::{CoreError, Invoice, LineRef, Money, PaymentStatus, SaleTotals, TenderType};
use bazaar_db::{Database, DbError, SaleCommit, SaleLine};

use crate::config::PosConfig;
use crate::error::{EngineError, EngineResult};
use crate::session::{CheckoutSession, FolioPosting, SessionPhase};
use crate::sinks::{FolioCharge, FolioPoster, ReceiptSink, ReceiptSnapshot};

// =============================================================================
// Checkout Service
// =============================================================================

/// Orchestrates direct sales at the register.
///
/// The service is stateless between calls; all sale state lives in the
/// [`CheckoutSession`] the caller holds. One service instance serves any
/// number of concurrent sessions.
pub struct CheckoutService {
    db: Arc<Database>,
    config: PosConfig,
    receipts: Arc<dyn ReceiptSink>,
    folio: Arc<dyn FolioPoster>,
}

impl CheckoutService {
    /// Creates a checkout service over the given storage and collaborators.
    pub fn new(
        db: Arc<Database>,
        config: PosConfig,
        receipts: Arc<dyn ReceiptSink>,
        folio: Arc<dyn FolioPoster>,
    ) -> Self {
        CheckoutService {
            db,
            config,
            receipts,
            folio,
        }
    }

    /// Opens a new checkout session with the configured tax defaults.
    pub fn open_session(&self) -> CheckoutSession {
        let session = CheckoutSession::open(&self.config);
        debug!(session_id = %session.id(), "Checkout session opened");
        session
    }

    // =========================================================================
    // Cart Mutations
    // =========================================================================

    /// Adds a product line (or grows the existing one).
    ///
    /// Rejects inactive/unknown products and quantities beyond what the
    /// product's batches can currently cover; on rejection the cart is
    /// untouched.
    pub async fn add_product(
        &self,
        session: &mut CheckoutSession,
        product_id: &str,
        quantity: i64,
    ) -> EngineResult<()> {
        let cart = session.cart_mut()?;

        let product = self
            .db
            .products()
            .get_by_id(product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;

        let requested = cart.demand_for(&product.id) + quantity;
        self.ensure_stock(&product.id, &product.name, requested)
            .await?;

        cart.add_product(&product, quantity)?;
        debug!(product_id = %product.id, quantity, "Product added to cart");
        Ok(())
    }

    /// Adds a service line (or grows the existing one).
    ///
    /// Linked items check their mirror product's availability; untracked
    /// items never touch stock.
    pub async fn add_service(
        &self,
        session: &mut CheckoutSession,
        service_item_id: &str,
        quantity: i64,
    ) -> EngineResult<()> {
        let cart = session.cart_mut()?;

        let item = self
            .db
            .service_items()
            .get_by_id(service_item_id)
            .await?
            .filter(|i| i.is_active)
            .ok_or_else(|| CoreError::ServiceItemNotFound(service_item_id.to_string()))?;

        if let Some(pid) = &item.linked_product_id {
            let requested = cart.demand_for(pid) + quantity;
            self.ensure_stock(pid, &item.name, requested).await?;
        }

        cart.add_service(&item, quantity)?;
        debug!(service_item_id = %item.id, quantity, "Service added to cart");
        Ok(())
    }

    /// Sets a line's quantity. Zero removes the line.
    ///
    /// Increases on stock-tracked lines re-check availability against the
    /// whole cart's demand for that product.
    pub async fn update_quantity(
        &self,
        session: &mut CheckoutSession,
        line_ref: &LineRef,
        quantity: i64,
    ) -> EngineResult<()> {
        let cart = session.cart_mut()?;

        if quantity > 0 {
            let stock_check = cart.line(line_ref).and_then(|line| {
                line.stock_product_id.as_ref().map(|pid| {
                    let requested = cart.demand_for(pid) - line.quantity + quantity;
                    (pid.clone(), line.name.clone(), requested)
                })
            });

            if let Some((product_id, name, requested)) = stock_check {
                self.ensure_stock(&product_id, &name, requested).await?;
            }
        }

        cart.update_quantity(line_ref, quantity)?;
        Ok(())
    }

    /// Overrides a line's unit price.
    pub fn update_price(
        &self,
        session: &mut CheckoutSession,
        line_ref: &LineRef,
        unit_price_cents: i64,
    ) -> EngineResult<()> {
        session.cart_mut()?.update_price(line_ref, unit_price_cents)?;
        Ok(())
    }

    /// Attaches or clears a line note.
    pub fn set_line_note(
        &self,
        session: &mut CheckoutSession,
        line_ref: &LineRef,
        note: Option<String>,
    ) -> EngineResult<()> {
        session.cart_mut()?.set_note(line_ref, note)?;
        Ok(())
    }

    /// Removes a line.
    pub fn remove_line(
        &self,
        session: &mut CheckoutSession,
        line_ref: &LineRef,
    ) -> EngineResult<()> {
        session.cart_mut()?.remove_line(line_ref)?;
        Ok(())
    }

    /// Sets the whole-cart discount in basis points.
    pub fn set_discount(&self, session: &mut CheckoutSession, discount_bps: u32) -> EngineResult<()> {
        session.cart_mut()?.set_discount_bps(discount_bps)?;
        Ok(())
    }

    /// Empties the cart, keeping the session open.
    pub fn clear_cart(&self, session: &mut CheckoutSession) -> EngineResult<()> {
        session.cart_mut()?.clear();
        Ok(())
    }

    // =========================================================================
    // Tendering
    // =========================================================================

    /// Freezes totals and moves the session into the tendering phase.
    pub fn begin_tender(&self, session: &mut CheckoutSession) -> EngineResult<SaleTotals> {
        let totals = session.begin_tender()?;
        debug!(
            session_id = %session.id(),
            total_cents = totals.total_cents,
            "Tendering started"
        );
        Ok(totals)
    }

    /// Records one payment of a split settlement.
    ///
    /// Room charges do not go through here: they must post to a folio via
    /// [`charge_to_folio`](Self::charge_to_folio) so the ledger gets its say.
    pub fn add_payment(
        &self,
        session: &mut CheckoutSession,
        method: TenderType,
        amount: Money,
        reference: Option<String>,
    ) -> EngineResult<()> {
        if method.is_deferred() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "room charges must post through a folio".to_string(),
            }
            .into());
        }

        session.tender_mut()?.add_payment(method, amount, reference)?;
        Ok(())
    }

    /// Settles the whole sale with one tender, returning change.
    pub fn tender_single(
        &self,
        session: &mut CheckoutSession,
        method: TenderType,
        tendered: Money,
        reference: Option<String>,
    ) -> EngineResult<Money> {
        if method.is_deferred() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "room charges must post through a folio".to_string(),
            }
            .into());
        }

        let change = session.tender_mut()?.tender_single(method, tendered, reference)?;
        Ok(change)
    }

    /// Posts the outstanding balance to an external folio.
    ///
    /// The charge goes to the folio collaborator first; only an accepted
    /// posting becomes a payment line (with the posting id as its
    /// reference). One folio posting per sale.
    pub async fn charge_to_folio(
        &self,
        session: &mut CheckoutSession,
        folio_ref: &str,
    ) -> EngineResult<()> {
        let remaining = session.tender_mut()?.remaining();
        if !remaining.is_positive() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "nothing left to charge".to_string(),
            }
            .into());
        }
        if session.folio().is_some() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "a folio charge is already posted for this sale".to_string(),
            }
            .into());
        }

        let charge = FolioCharge {
            folio_ref: folio_ref.to_string(),
            amount_cents: remaining.cents(),
            description: format!("{} sale", self.config.store_name()),
        };
        let posting_id = self.folio.post_charge(&charge).await?;
        info!(
            folio_ref,
            posting_id = %posting_id,
            amount_cents = charge.amount_cents,
            "Folio charge posted"
        );

        session.tender_mut()?.add_payment(
            TenderType::RoomCharge,
            remaining,
            Some(posting_id.clone()),
        )?;
        session.record_folio(FolioPosting {
            folio_ref: folio_ref.to_string(),
            posting_id,
            amount_cents: remaining.cents(),
        });
        Ok(())
    }

    /// Abandons tendering and returns to shopping.
    ///
    /// Reverses any posted folio charge first; payments are dropped and
    /// totals go live again.
    pub async fn reopen_cart(&self, session: &mut CheckoutSession) -> EngineResult<()> {
        if session.phase() != SessionPhase::Tendering {
            return Err(EngineError::SessionState {
                expected: SessionPhase::Tendering,
                actual: session.phase(),
            });
        }

        if let Some(posting) = session.folio().cloned() {
            self.folio.reverse_charge(&posting.posting_id).await?;
            info!(posting_id = %posting.posting_id, "Folio charge reversed");
        }

        session.reopen_cart()
    }

    /// Throws the sale away: reverses any pending folio posting and resets
    /// the session to an empty cart.
    pub async fn abandon_sale(&self, session: &mut CheckoutSession) -> EngineResult<()> {
        if session.phase() == SessionPhase::Tendering {
            if let Some(posting) = session.folio().cloned() {
                self.folio.reverse_charge(&posting.posting_id).await?;
                info!(posting_id = %posting.posting_id, "Folio charge reversed");
            }
        }

        session.reset();
        debug!(session_id = %session.id(), "Sale abandoned");
        Ok(())
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Commits a settled sale.
    ///
    /// Everything lands in one storage transaction: invoice, lines,
    /// payments, FEFO stock draws. On success the session moves to
    /// `committed` and a receipt is dispatched (failures there are logged,
    /// never propagated).
    ///
    /// On failure the tender is unwound: a posted folio charge is reversed
    /// and the session returns to shopping so the cashier can fix the cart
    /// and try again. If the reversal itself fails the error is
    /// [`EngineError::CommitPartialFailure`] and the session is left in
    /// tendering for the operator to inspect.
    pub async fn commit_sale(&self, session: &mut CheckoutSession) -> EngineResult<Invoice> {
        let split = session.tender_mut()?;
        split.require_settled()?;

        let payments = split.payments().to_vec();
        let payment_method = split.payment_summary();
        let payment_status = if split.has_deferred() {
            PaymentStatus::Pending
        } else {
            PaymentStatus::Paid
        };

        let lines = session
            .cart()
            .lines
            .iter()
            .map(|line| SaleLine {
                product_id: match &line.line_ref {
                    LineRef::Product(id) => Some(id.clone()),
                    LineRef::Service(_) => None,
                },
                service_item_id: match &line.line_ref {
                    LineRef::Service(id) => Some(id.clone()),
                    LineRef::Product(_) => None,
                },
                name_snapshot: line.name.clone(),
                unit_price_cents: line.unit_price_cents,
                quantity: line.quantity,
                note: line.note.clone(),
            })
            .collect();

        let commit = SaleCommit {
            lines,
            totals: session.totals(),
            payment_method,
            payments,
            payment_status,
            folio_ref: session.folio().map(|f| f.folio_ref.clone()),
            stock_demands: session.cart().stock_demands(),
        };

        match self.db.checkout().commit_sale(commit).await {
            Ok(invoice) => {
                session.mark_committed(&invoice.invoice_number)?;
                info!(
                    session_id = %session.id(),
                    invoice = %invoice.invoice_number,
                    total_cents = invoice.total_cents,
                    "Sale committed"
                );
                dispatch_receipt(&self.db, &self.config, self.receipts.as_ref(), &invoice).await;
                Ok(invoice)
            }
            Err(err) => self.unwind_failed_commit(session, err).await,
        }
    }

    async fn unwind_failed_commit(
        &self,
        session: &mut CheckoutSession,
        err: DbError,
    ) -> EngineResult<Invoice> {
        warn!(session_id = %session.id(), error = %err, "Sale commit failed");

        if let Some(posting) = session.folio().cloned() {
            if let Err(reversal_err) = self.folio.reverse_charge(&posting.posting_id).await {
                error!(
                    folio_ref = %posting.folio_ref,
                    posting_id = %posting.posting_id,
                    error = %reversal_err,
                    "Folio reversal failed; the posting needs manual reversal"
                );
                return Err(EngineError::CommitPartialFailure {
                    folio_ref: posting.folio_ref,
                    posting_id: posting.posting_id,
                    reason: format!("{err}; reversal: {reversal_err}"),
                });
            }
            info!(posting_id = %posting.posting_id, "Folio charge reversed");
        }

        session.reopen_cart()?;
        Err(err.into())
    }

    // =========================================================================
    // Receipts and Settlement
    // =========================================================================

    /// Reprints the most recent invoice's receipt.
    ///
    /// Unlike post-commit dispatch this is an explicit user action, so sink
    /// failures propagate.
    pub async fn reprint_last_receipt(&self) -> EngineResult<ReceiptSnapshot> {
        let invoice = self
            .db
            .invoices()
            .latest()
            .await?
            .ok_or_else(|| DbError::not_found("Invoice", "latest"))?;

        let snapshot = resolve_receipt(&self.db, &self.config, invoice, true).await?;
        self.receipts.print(&snapshot).await?;
        info!(invoice = %snapshot.invoice.invoice_number, "Receipt reprinted");
        Ok(snapshot)
    }

    /// Settles a pending (folio) invoice.
    pub async fn mark_invoice_paid(&self, invoice_id: &str) -> EngineResult<()> {
        self.db.invoices().mark_paid(invoice_id).await?;
        info!(invoice_id, "Invoice settled");
        Ok(())
    }

    async fn ensure_stock(
        &self,
        product_id: &str,
        display_name: &str,
        requested: i64,
    ) -> EngineResult<()> {
        let available = self.db.batches().available_quantity(product_id).await?;
        if requested > available {
            debug!(product_id, available, requested, "Stock check failed");
            return Err(CoreError::InsufficientStock {
                product: display_name.to_string(),
                available,
                requested,
            }
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// Receipt Resolution
// =============================================================================

/// Loads the line items and payments behind an invoice and packages them
/// with the store identity for printing.
pub(crate) async fn resolve_receipt(
    db: &Database,
    config: &PosConfig,
    invoice: Invoice,
    reprint: bool,
) -> EngineResult<ReceiptSnapshot> {
    let items = db.invoices().get_items(&invoice.id).await?;
    let payments = db.invoices().get_payments(&invoice.id).await?;
    Ok(ReceiptSnapshot {
        invoice,
        items,
        payments,
        store_name: config.store.name.clone(),
        currency_symbol: config.store.currency_symbol.clone(),
        reprint,
    })
}

/// Prints a receipt after a committed sale or billing run.
///
/// The money is already in the ledger at this point, so printer trouble is
/// logged and swallowed rather than bubbled up to the cashier.
pub(crate) async fn dispatch_receipt(
    db: &Database,
    config: &PosConfig,
    sink: &dyn ReceiptSink,
    invoice: &Invoice,
) {
    match resolve_receipt(db, config, invoice.clone(), false).await {
        Ok(snapshot) => {
            if let Err(err) = sink.print(&snapshot).await {
                warn!(
                    invoice = %invoice.invoice_number,
                    error = %err,
                    "Receipt print failed"
                );
            }
        }
        Err(err) => warn!(
            invoice = %invoice.invoice_number,
            error = %err,
            "Receipt data could not be resolved"
        ),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_core::{Product, ProductBatch, ServiceItem, Station};
    use bazaar_db::{Database, DbConfig};
    use chrono::Utc;

    use crate::sinks::{MemoryFolioPoster, MemoryReceiptSink};

    struct Rig {
        db: Database,
        receipts: Arc<MemoryReceiptSink>,
        poster: Arc<MemoryFolioPoster>,
        service: CheckoutService,
    }

    fn test_config() -> PosConfig {
        let mut config = PosConfig::default();
        config.store.name = "Test Store".to_string();
        config.tax.enabled = false;
        config
    }

    async fn rig_full(
        config: PosConfig,
        receipts: MemoryReceiptSink,
        poster: MemoryFolioPoster,
    ) -> Rig {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let receipts = Arc::new(receipts);
        let poster = Arc::new(poster);
        let service = CheckoutService::new(
            Arc::new(db.clone()),
            config,
            receipts.clone(),
            poster.clone(),
        );
        Rig {
            db,
            receipts,
            poster,
            service,
        }
    }

    async fn rig() -> Rig {
        rig_full(
            test_config(),
            MemoryReceiptSink::new(),
            MemoryFolioPoster::new(),
        )
        .await
    }

    async fn seed_product(db: &Database, id: &str, price_cents: i64) {
        let now = Utc::now();
        db.products()
            .insert(&Product {
                id: id.to_string(),
                sku: format!("SKU-{id}"),
                name: format!("Product {id}"),
                purchase_price_cents: price_cents / 2,
                selling_price_cents: price_cents,
                stock_quantity: 0,
                min_stock_threshold: 1,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    async fn seed_stock(db: &Database, product_id: &str, batch: &str, quantity: i64) -> ProductBatch {
        db.stock()
            .receive_batch(product_id, batch, quantity, 500, 1000, None)
            .await
            .unwrap()
    }

    async fn seed_service(db: &Database, id: &str, name: &str, price_cents: i64, linked: Option<&str>) {
        let now = Utc::now();
        db.service_items()
            .insert(&ServiceItem {
                id: id.to_string(),
                name: name.to_string(),
                station: Station::Kitchen,
                selling_price_cents: price_cents,
                linked_product_id: linked.map(str::to_string),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cash_sale_end_to_end() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 2500).await;
        seed_stock(&rig.db, "p1", "B1", 10).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 2).await.unwrap();

        let totals = rig.service.begin_tender(&mut session).unwrap();
        assert_eq!(totals.total_cents, 5000);

        let change = rig
            .service
            .tender_single(&mut session, TenderType::Cash, Money::from_cents(6000), None)
            .unwrap();
        assert_eq!(change, Money::from_cents(1000));

        let invoice = rig.service.commit_sale(&mut session).await.unwrap();
        assert!(invoice.invoice_number.starts_with("INV-"));
        assert_eq!(invoice.payment_method, "cash");
        assert_eq!(invoice.payment_status, PaymentStatus::Paid);
        assert_eq!(invoice.total_cents, 5000);

        assert_eq!(session.phase(), SessionPhase::Committed);
        assert_eq!(
            session.committed_invoice(),
            Some(invoice.invoice_number.as_str())
        );

        let receipts = rig.receipts.receipts().await;
        assert_eq!(receipts.len(), 1);
        assert!(!receipts[0].reprint);
        assert_eq!(receipts[0].store_name, "Test Store");
        assert_eq!(receipts[0].invoice.invoice_number, invoice.invoice_number);
        assert_eq!(receipts[0].payments.len(), 1);
        assert_eq!(receipts[0].payments[0].tendered_cents, Some(6000));

        let available = rig.db.batches().available_quantity("p1").await.unwrap();
        assert_eq!(available, 8);
    }

    #[tokio::test]
    async fn test_sale_collects_tax_when_enabled() {
        let rig = rig_full(
            PosConfig::default(),
            MemoryReceiptSink::new(),
            MemoryFolioPoster::new(),
        )
        .await;
        seed_product(&rig.db, "p1", 10000).await;
        seed_stock(&rig.db, "p1", "B1", 5).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 1).await.unwrap();

        let totals = rig.service.begin_tender(&mut session).unwrap();
        assert_eq!(totals.tax_cents, 1800);
        assert_eq!(totals.total_cents, 11800);

        let change = rig
            .service
            .tender_single(&mut session, TenderType::Cash, Money::from_cents(12000), None)
            .unwrap();
        assert_eq!(change, Money::from_cents(200));

        let invoice = rig.service.commit_sale(&mut session).await.unwrap();
        assert_eq!(invoice.tax_cents, 1800);
        assert_eq!(invoice.total_cents, 11800);
    }

    #[tokio::test]
    async fn test_add_product_rejects_beyond_available() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 2000).await;
        seed_stock(&rig.db, "p1", "B1", 3).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 2).await.unwrap();

        let err = rig
            .service
            .add_product(&mut session, "p1", 2)
            .await
            .unwrap_err();
        match err {
            EngineError::Domain(CoreError::InsufficientStock {
                product,
                available,
                requested,
            }) => {
                assert_eq!(product, "Product p1");
                assert_eq!(available, 3);
                assert_eq!(requested, 4);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        // Cart untouched by the rejected add
        let line_ref = LineRef::Product("p1".to_string());
        assert_eq!(session.cart().line(&line_ref).unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_products_are_not_found() {
        let rig = rig().await;
        let mut session = rig.service.open_session();

        let err = rig
            .service
            .add_product(&mut session, "ghost", 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(CoreError::ProductNotFound(_))
        ));

        seed_product(&rig.db, "p1", 2000).await;
        rig.db.products().soft_delete("p1").await.unwrap();
        let err = rig
            .service
            .add_product(&mut session, "p1", 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(CoreError::ProductNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_service_checks_mirror_stock() {
        let rig = rig().await;
        seed_product(&rig.db, "beer", 500).await;
        seed_stock(&rig.db, "beer", "B1", 2).await;
        seed_service(&rig.db, "s1", "Draft Beer", 900, Some("beer")).await;
        seed_service(&rig.db, "s2", "Green Salad", 1200, None).await;

        let mut session = rig.service.open_session();
        rig.service.add_service(&mut session, "s1", 2).await.unwrap();

        let err = rig
            .service
            .add_service(&mut session, "s1", 1)
            .await
            .unwrap_err();
        match err {
            EngineError::Domain(CoreError::InsufficientStock { product, .. }) => {
                // Shortages are reported under the name the cashier sees
                assert_eq!(product, "Draft Beer");
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        // Untracked services never consult stock
        rig.service.add_service(&mut session, "s2", 5).await.unwrap();
        assert_eq!(session.cart().line_count(), 2);
    }

    #[tokio::test]
    async fn test_update_quantity_honors_stock() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 1500).await;
        seed_stock(&rig.db, "p1", "B1", 5).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 2).await.unwrap();
        let line_ref = LineRef::Product("p1".to_string());

        rig.service
            .update_quantity(&mut session, &line_ref, 5)
            .await
            .unwrap();

        let err = rig
            .service
            .update_quantity(&mut session, &line_ref, 6)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(CoreError::InsufficientStock { .. })
        ));
        assert_eq!(session.cart().line(&line_ref).unwrap().quantity, 5);

        // Zero removes the line without any stock consultation
        rig.service
            .update_quantity(&mut session, &line_ref, 0)
            .await
            .unwrap();
        assert!(session.cart().is_empty());
    }

    #[tokio::test]
    async fn test_split_tender_and_summary() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 10000).await;
        seed_stock(&rig.db, "p1", "B1", 3).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 1).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();

        rig.service
            .add_payment(&mut session, TenderType::Cash, Money::from_cents(4000), None)
            .unwrap();
        assert!(!session.tender().unwrap().is_settled());

        rig.service
            .add_payment(
                &mut session,
                TenderType::Card,
                Money::from_cents(6000),
                Some("AUTH-17".to_string()),
            )
            .unwrap();

        let invoice = rig.service.commit_sale(&mut session).await.unwrap();
        assert_eq!(invoice.payment_method, "cash+card");
        assert_eq!(invoice.payment_status, PaymentStatus::Paid);

        let payments = rig.db.invoices().get_payments(&invoice.id).await.unwrap();
        assert_eq!(payments.len(), 2);
        let card = payments.iter().find(|p| p.method == TenderType::Card).unwrap();
        assert_eq!(card.reference.as_deref(), Some("AUTH-17"));
    }

    #[tokio::test]
    async fn test_room_charge_flow() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 5000).await;
        seed_stock(&rig.db, "p1", "B1", 4).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 1).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();

        rig.service
            .charge_to_folio(&mut session, "F-204")
            .await
            .unwrap();

        let postings = rig.poster.postings().await;
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].1.folio_ref, "F-204");
        assert_eq!(postings[0].1.amount_cents, 5000);
        assert!(postings[0].1.description.contains("Test Store"));

        let invoice = rig.service.commit_sale(&mut session).await.unwrap();
        assert_eq!(invoice.payment_status, PaymentStatus::Pending);
        assert_eq!(invoice.folio_ref.as_deref(), Some("F-204"));
        assert_eq!(invoice.payment_method, "room_charge");

        let payments = rig.db.invoices().get_payments(&invoice.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].method, TenderType::RoomCharge);
        assert_eq!(payments[0].reference.as_deref(), Some("post-1"));

        // Folio settlement later
        assert_eq!(rig.db.invoices().list_pending().await.unwrap().len(), 1);
        rig.service.mark_invoice_paid(&invoice.id).await.unwrap();
        let settled = rig.db.invoices().get_by_id(&invoice.id).await.unwrap().unwrap();
        assert_eq!(settled.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_partial_cash_then_folio_remainder() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 5000).await;
        seed_stock(&rig.db, "p1", "B1", 4).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 1).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();

        rig.service
            .add_payment(&mut session, TenderType::Cash, Money::from_cents(2000), None)
            .unwrap();
        rig.service
            .charge_to_folio(&mut session, "F-101")
            .await
            .unwrap();

        let postings = rig.poster.postings().await;
        assert_eq!(postings[0].1.amount_cents, 3000);

        let invoice = rig.service.commit_sale(&mut session).await.unwrap();
        assert_eq!(invoice.payment_method, "cash+room_charge");
        assert_eq!(invoice.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_commit_failure_reverses_folio_posting() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 1000).await;
        let batch = seed_stock(&rig.db, "p1", "B1", 5).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 5).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();
        rig.service
            .charge_to_folio(&mut session, "F-204")
            .await
            .unwrap();

        // Stock vanishes between tendering and commit (damage writeoff)
        rig.db.stock().adjust_batch(&batch.id, -3, "damage").await.unwrap();

        let err = rig.service.commit_sale(&mut session).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Storage(DbError::InsufficientStock { .. })
        ));

        // The posted charge was compensated and the sale is editable again
        assert_eq!(rig.poster.reversals().await, vec!["post-1".to_string()]);
        assert_eq!(session.phase(), SessionPhase::Shopping);
        assert!(session.tender().is_none());
        assert!(rig.db.invoices().latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_reversal_surfaces_partial_failure() {
        let rig = rig_full(
            test_config(),
            MemoryReceiptSink::new(),
            MemoryFolioPoster::with_failing_reversals(),
        )
        .await;
        seed_product(&rig.db, "p1", 1000).await;
        let batch = seed_stock(&rig.db, "p1", "B1", 5).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 5).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();
        rig.service
            .charge_to_folio(&mut session, "F-204")
            .await
            .unwrap();

        rig.db.stock().adjust_batch(&batch.id, -3, "damage").await.unwrap();

        let err = rig.service.commit_sale(&mut session).await.unwrap_err();
        match err {
            EngineError::CommitPartialFailure {
                folio_ref,
                posting_id,
                ..
            } => {
                assert_eq!(folio_ref, "F-204");
                assert_eq!(posting_id, "post-1");
            }
            other => panic!("expected CommitPartialFailure, got {other:?}"),
        }

        // Session is left in tendering for the operator to inspect
        assert_eq!(session.phase(), SessionPhase::Tendering);
    }

    #[tokio::test]
    async fn test_folio_rejection_leaves_tender_open() {
        let rig = rig_full(
            test_config(),
            MemoryReceiptSink::new(),
            MemoryFolioPoster::rejecting(),
        )
        .await;
        seed_product(&rig.db, "p1", 3000).await;
        seed_stock(&rig.db, "p1", "B1", 2).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 1).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();

        let err = rig
            .service
            .charge_to_folio(&mut session, "F-400")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::FolioRejected { .. }));

        // Nothing was recorded; cash still settles the sale
        assert!(session.folio().is_none());
        assert_eq!(session.tender().unwrap().remaining(), Money::from_cents(3000));
        rig.service
            .tender_single(&mut session, TenderType::Cash, Money::from_cents(3000), None)
            .unwrap();
        let invoice = rig.service.commit_sale(&mut session).await.unwrap();
        assert_eq!(invoice.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_receipt_failure_never_fails_commit() {
        let rig = rig_full(
            test_config(),
            MemoryReceiptSink::failing(),
            MemoryFolioPoster::new(),
        )
        .await;
        seed_product(&rig.db, "p1", 2000).await;
        seed_stock(&rig.db, "p1", "B1", 2).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 1).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();
        rig.service
            .tender_single(&mut session, TenderType::Cash, Money::from_cents(2000), None)
            .unwrap();

        let invoice = rig.service.commit_sale(&mut session).await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Committed);
        assert!(rig.db.invoices().get_by_id(&invoice.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reprint_last_receipt() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 2000).await;
        seed_stock(&rig.db, "p1", "B1", 2).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 1).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();
        rig.service
            .tender_single(&mut session, TenderType::Cash, Money::from_cents(2000), None)
            .unwrap();
        let invoice = rig.service.commit_sale(&mut session).await.unwrap();

        let snapshot = rig.service.reprint_last_receipt().await.unwrap();
        assert!(snapshot.reprint);
        assert_eq!(snapshot.invoice.invoice_number, invoice.invoice_number);
        assert_eq!(rig.receipts.receipts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_reprint_without_history_errors() {
        let rig = rig().await;
        let err = rig.service.reprint_last_receipt().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Storage(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_room_charge_via_add_payment_is_rejected() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 2000).await;
        seed_stock(&rig.db, "p1", "B1", 2).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 1).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();

        let err = rig
            .service
            .add_payment(
                &mut session,
                TenderType::RoomCharge,
                Money::from_cents(2000),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(CoreError::InvalidPaymentAmount { .. })
        ));
    }

    #[tokio::test]
    async fn test_abandon_sale_reverses_posting_and_resets() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 4000).await;
        seed_stock(&rig.db, "p1", "B1", 2).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 1).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();
        rig.service
            .charge_to_folio(&mut session, "F-204")
            .await
            .unwrap();

        rig.service.abandon_sale(&mut session).await.unwrap();
        assert_eq!(rig.poster.reversals().await, vec!["post-1".to_string()]);
        assert_eq!(session.phase(), SessionPhase::Shopping);
        assert!(session.cart().is_empty());
    }

    #[tokio::test]
    async fn test_cart_is_locked_while_tendering() {
        let rig = rig().await;
        seed_product(&rig.db, "p1", 2000).await;
        seed_stock(&rig.db, "p1", "B1", 5).await;

        let mut session = rig.service.open_session();
        rig.service.add_product(&mut session, "p1", 1).await.unwrap();
        rig.service.begin_tender(&mut session).unwrap();

        let err = rig
            .service
            .add_product(&mut session, "p1", 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::SessionState {
                expected: SessionPhase::Shopping,
                actual: SessionPhase::Tendering,
            }
        ));
    }
}
