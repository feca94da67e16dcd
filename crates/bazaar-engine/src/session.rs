//! # Checkout Session
//!
//! The working state of one sale at the register, driven through a small
//! phase machine.
//!
//! ## Phase Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Session Phases                                    │
//! │                                                                         │
//! │              begin_tender              commit                           │
//! │  SHOPPING ───────────────▶ TENDERING ─────────▶ COMMITTED               │
//! │     ▲                          │                    │                   │
//! │     │       reopen_cart        │                    │                   │
//! │     └──────────────────────────┘                    │                   │
//! │     │                                               │                   │
//! │     └───────────────────── reset ◀──────────────────┘                   │
//! │                                                                         │
//! │  SHOPPING:  cart is mutable, totals are live                            │
//! │  TENDERING: cart is frozen, payments accumulate against fixed totals    │
//! │  COMMITTED: read-only record of the finished sale                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Freezing totals at `begin_tender` is what makes split settlement safe:
//! every payment validates against the same target, no matter how long the
//! customer takes to find their second card.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bazaar_core::{Cart, CoreError, SaleTotals, TenderSplit};

use crate::config::PosConfig;
use crate::error::{EngineError, EngineResult};

// =============================================================================
// Session Phase
// =============================================================================

/// Where a checkout session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Cart mutations allowed, totals recomputed live.
    Shopping,
    /// Totals frozen, payments accumulating.
    Tendering,
    /// Sale persisted, session is a read-only record.
    Committed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Shopping => write!(f, "shopping"),
            SessionPhase::Tendering => write!(f, "tendering"),
            SessionPhase::Committed => write!(f, "committed"),
        }
    }
}

// =============================================================================
// Folio Posting
// =============================================================================

/// Record of a charge posted to an external folio during tendering.
///
/// Kept on the session so a failed commit knows what to reverse, and a
/// successful one knows which folio reference to stamp on the invoice.
#[derive(Debug, Clone)]
pub struct FolioPosting {
    /// Folio the charge was posted to (room number, account id).
    pub folio_ref: String,
    /// The collaborator's id for the posting, used for reversal.
    pub posting_id: String,
    /// Amount posted, in cents.
    pub amount_cents: i64,
}

// =============================================================================
// Checkout Session
// =============================================================================

/// One sale in progress at the register.
///
/// The session owns the cart and the tender split and enforces the phase
/// machine between them. All catalog and stock awareness lives in
/// [`CheckoutService`](crate::checkout::CheckoutService); the session only
/// guards which operations are legal when.
#[derive(Debug)]
pub struct CheckoutSession {
    id: String,
    phase: SessionPhase,
    cart: Cart,
    frozen_totals: Option<SaleTotals>,
    tender: Option<TenderSplit>,
    folio: Option<FolioPosting>,
    committed_invoice: Option<String>,
    opened_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Opens a fresh session with the config's tax defaults.
    pub fn open(config: &PosConfig) -> Self {
        CheckoutSession {
            id: Uuid::new_v4().to_string(),
            phase: SessionPhase::Shopping,
            cart: Cart::new(config.tax_rate(), config.tax_enabled()),
            frozen_totals: None,
            tender: None,
            folio: None,
            committed_invoice: None,
            opened_at: Utc::now(),
        }
    }

    /// Session identity, used in logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// When the session was opened.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Read access to the cart in any phase.
    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    /// Mutable cart access, shopping phase only.
    pub fn cart_mut(&mut self) -> EngineResult<&mut Cart> {
        self.require_phase(SessionPhase::Shopping)?;
        Ok(&mut self.cart)
    }

    /// Sale totals: live while shopping, frozen from `begin_tender` on.
    pub fn totals(&self) -> SaleTotals {
        self.frozen_totals.unwrap_or_else(|| self.cart.totals())
    }

    /// Freezes the cart and moves to the tendering phase.
    ///
    /// Returns the frozen totals; every subsequent payment validates
    /// against them.
    pub fn begin_tender(&mut self) -> EngineResult<SaleTotals> {
        self.require_phase(SessionPhase::Shopping)?;
        if self.cart.is_empty() {
            return Err(CoreError::CartEmpty.into());
        }

        let totals = self.cart.totals();
        self.frozen_totals = Some(totals);
        self.tender = Some(TenderSplit::new(totals.total()));
        self.phase = SessionPhase::Tendering;
        Ok(totals)
    }

    /// The tender split, if tendering has started.
    pub fn tender(&self) -> Option<&TenderSplit> {
        self.tender.as_ref()
    }

    /// Mutable tender access, tendering phase only.
    pub fn tender_mut(&mut self) -> EngineResult<&mut TenderSplit> {
        match (self.phase, self.tender.as_mut()) {
            (SessionPhase::Tendering, Some(split)) => Ok(split),
            (phase, _) => Err(EngineError::SessionState {
                expected: SessionPhase::Tendering,
                actual: phase,
            }),
        }
    }

    /// Abandons tendering and returns to shopping.
    ///
    /// All recorded payments are dropped and totals go live again. Callers
    /// must reverse any folio posting before calling this; the session
    /// forgets the posting record here.
    pub fn reopen_cart(&mut self) -> EngineResult<()> {
        self.require_phase(SessionPhase::Tendering)?;
        self.frozen_totals = None;
        self.tender = None;
        self.folio = None;
        self.phase = SessionPhase::Shopping;
        Ok(())
    }

    /// The folio posting recorded for this sale, if any.
    pub fn folio(&self) -> Option<&FolioPosting> {
        self.folio.as_ref()
    }

    pub(crate) fn record_folio(&mut self, posting: FolioPosting) {
        self.folio = Some(posting);
    }

    /// The committed invoice number, once the sale went through.
    pub fn committed_invoice(&self) -> Option<&str> {
        self.committed_invoice.as_deref()
    }

    pub(crate) fn mark_committed(&mut self, invoice_number: &str) -> EngineResult<()> {
        self.require_phase(SessionPhase::Tendering)?;
        self.committed_invoice = Some(invoice_number.to_string());
        self.phase = SessionPhase::Committed;
        Ok(())
    }

    /// Clears the session back to an empty shopping cart.
    ///
    /// Tax parameters carry over from the original open; discount, lines,
    /// payments and commit record are all dropped. This is the "next
    /// customer" action after a committed sale, and the hard bail-out
    /// everywhere else.
    pub fn reset(&mut self) {
        self.cart = Cart::new(self.cart.tax_rate, self.cart.tax_enabled);
        self.frozen_totals = None;
        self.tender = None;
        self.folio = None;
        self.committed_invoice = None;
        self.phase = SessionPhase::Shopping;
    }

    fn require_phase(&self, expected: SessionPhase) -> EngineResult<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(EngineError::SessionState {
                expected,
                actual: self.phase,
            })
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_core::{Money, Product, TenderType};
    use chrono::Utc;

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

    fn session() -> CheckoutSession {
        CheckoutSession::open(&PosConfig::default())
    }

    #[test]
    fn test_open_starts_shopping_with_config_tax() {
        let session = session();
        assert_eq!(session.phase(), SessionPhase::Shopping);
        assert!(session.cart().is_empty());
        assert_eq!(session.cart().tax_rate.bps(), 1800);
        assert!(session.cart().tax_enabled);
        assert!(session.tender().is_none());
    }

    #[test]
    fn test_begin_tender_rejects_empty_cart() {
        let mut session = session();
        let err = session.begin_tender().unwrap_err();
        assert!(matches!(err, EngineError::Domain(CoreError::CartEmpty)));
    }

    #[test]
    fn test_begin_tender_freezes_totals() {
        let mut session = session();
        session
            .cart_mut()
            .unwrap()
            .add_product(&test_product("p1", 2500), 2)
            .unwrap();

        let totals = session.begin_tender().unwrap();
        assert_eq!(totals.subtotal_cents, 5000);
        assert_eq!(session.phase(), SessionPhase::Tendering);
        assert_eq!(session.totals().total_cents, totals.total_cents);
        assert_eq!(
            session.tender().unwrap().total(),
            Money::from_cents(totals.total_cents)
        );
    }

    #[test]
    fn test_cart_is_locked_outside_shopping() {
        let mut session = session();
        session
            .cart_mut()
            .unwrap()
            .add_product(&test_product("p1", 1000), 1)
            .unwrap();
        session.begin_tender().unwrap();

        let err = session.cart_mut().unwrap_err();
        assert!(matches!(
            err,
            EngineError::SessionState {
                expected: SessionPhase::Shopping,
                actual: SessionPhase::Tendering,
            }
        ));
    }

    #[test]
    fn test_reopen_cart_drops_payments_and_unfreezes() {
        let mut session = session();
        session
            .cart_mut()
            .unwrap()
            .add_product(&test_product("p1", 10000), 1)
            .unwrap();
        session.begin_tender().unwrap();
        session
            .tender_mut()
            .unwrap()
            .add_payment(TenderType::Cash, Money::from_cents(5000), None)
            .unwrap();

        session.reopen_cart().unwrap();
        assert_eq!(session.phase(), SessionPhase::Shopping);
        assert!(session.tender().is_none());
        assert!(session.folio().is_none());

        // Totals are live again: cart edits change them
        session
            .cart_mut()
            .unwrap()
            .add_product(&test_product("p2", 500), 1)
            .unwrap();
        assert_eq!(session.totals().subtotal_cents, 10500);
    }

    #[test]
    fn test_mark_committed_requires_tendering() {
        let mut session = session();
        assert!(session.mark_committed("INV-1").is_err());

        session
            .cart_mut()
            .unwrap()
            .add_product(&test_product("p1", 1000), 1)
            .unwrap();
        session.begin_tender().unwrap();
        session.mark_committed("INV-1").unwrap();

        assert_eq!(session.phase(), SessionPhase::Committed);
        assert_eq!(session.committed_invoice(), Some("INV-1"));
        assert!(session.cart_mut().is_err());
        assert!(session.tender_mut().is_err());
    }

    #[test]
    fn test_reset_clears_to_fresh_cart() {
        let mut session = session();
        session
            .cart_mut()
            .unwrap()
            .add_product(&test_product("p1", 1000), 3)
            .unwrap();
        session.cart_mut().unwrap().set_discount_bps(500).unwrap();
        session.begin_tender().unwrap();
        session.mark_committed("INV-9").unwrap();

        session.reset();
        assert_eq!(session.phase(), SessionPhase::Shopping);
        assert!(session.cart().is_empty());
        assert_eq!(session.cart().discount_bps, 0);
        assert!(session.committed_invoice().is_none());
        // Tax parameters survive the reset
        assert_eq!(session.cart().tax_rate.bps(), 1800);
    }
}
