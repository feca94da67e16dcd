//! # Tender Reconciliation
//!
//! Accumulates payments against a target total and decides when a sale is
//! settled enough to commit.
//!
//! ## Two Tender Modes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SINGLE TENDER                        SPLIT TENDER                      │
//! │                                                                         │
//! │  total 100.00                         total 100.00                      │
//! │  customer hands 110.00 cash           40.00 cash                        │
//! │  → applied 100.00, change 10.00       35.00 card                        │
//! │    (overpay allowed, becomes change)  25.01 upi                         │
//! │                                       → remaining 0, settled            │
//! │                                       (overpay beyond epsilon rejected) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Settlement tolerance is one cent: `remaining() <= 0.01` settles. A
//! `room_charge` tender defers real settlement to a guest folio; it counts
//! as paid here once the folio accepted the charge, and the committed
//! invoice carries `payment_status = pending` until the folio is closed out.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::TenderType;

/// Settlement tolerance: one minor unit (0.01).
pub const SETTLEMENT_EPSILON: Money = Money::from_cents(1);

// =============================================================================
// Tender Line
// =============================================================================

/// One recorded payment towards the total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenderLine {
    /// How the customer paid.
    pub method: TenderType,

    /// Amount applied towards the total, in cents.
    pub amount_cents: i64,

    /// For single-tender cash: the amount actually handed over.
    pub tendered_cents: Option<i64>,

    /// For single-tender cash: change returned.
    pub change_cents: Option<i64>,

    /// External reference (card auth code, folio number, UPI txn id).
    pub reference: Option<String>,
}

impl TenderLine {
    /// Applied amount as Money.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Tender Split
// =============================================================================

/// Reconciles one or more payments against a fixed target total.
///
/// Created when tendering begins (the cart total is frozen at that point)
/// and consumed by the committer once `is_settled()` holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenderSplit {
    total: Money,
    payments: Vec<TenderLine>,
}

impl TenderSplit {
    /// Starts reconciliation against `total`.
    pub fn new(total: Money) -> Self {
        TenderSplit {
            total,
            payments: Vec::new(),
        }
    }

    /// The target total.
    #[inline]
    pub fn total(&self) -> Money {
        self.total
    }

    /// Payments recorded so far.
    pub fn payments(&self) -> &[TenderLine] {
        &self.payments
    }

    /// Sum of applied amounts.
    pub fn total_paid(&self) -> Money {
        Money::from_cents(self.payments.iter().map(|p| p.amount_cents).sum())
    }

    /// Unpaid balance, floored at zero.
    pub fn remaining(&self) -> Money {
        (self.total - self.total_paid()).max(Money::zero())
    }

    /// True once the unpaid balance is within the settlement epsilon.
    pub fn is_settled(&self) -> bool {
        self.remaining() <= SETTLEMENT_EPSILON
    }

    /// Errors with the outstanding balance unless settled. The commit path
    /// calls this as its gate.
    pub fn require_settled(&self) -> CoreResult<()> {
        if self.is_settled() {
            Ok(())
        } else {
            Err(CoreError::PaymentShortfall {
                remaining: self.remaining(),
            })
        }
    }

    /// Total change owed across recorded payments.
    pub fn change(&self) -> Money {
        Money::from_cents(self.payments.iter().filter_map(|p| p.change_cents).sum())
    }

    /// Sum applied through deferred (folio) tenders.
    pub fn deferred_amount(&self) -> Money {
        Money::from_cents(
            self.payments
                .iter()
                .filter(|p| p.method.is_deferred())
                .map(|p| p.amount_cents)
                .sum(),
        )
    }

    /// True when any recorded tender defers settlement to a folio.
    pub fn has_deferred(&self) -> bool {
        self.payments.iter().any(|p| p.method.is_deferred())
    }

    /// Adds a split-mode payment.
    ///
    /// Rejects non-positive amounts, and amounts that would push the running
    /// sum more than the settlement epsilon past the target: split mode is
    /// for covering the total exactly, change does not exist here.
    pub fn add_payment(
        &mut self,
        method: TenderType,
        amount: Money,
        reference: Option<String>,
    ) -> CoreResult<()> {
        if !amount.is_positive() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: format!("amount must be positive, got {amount}"),
            });
        }

        let paid_after = self.total_paid() + amount;
        if paid_after > self.total + SETTLEMENT_EPSILON {
            return Err(CoreError::SplitOverpay {
                attempted: amount,
                remaining: self.remaining(),
            });
        }

        self.payments.push(TenderLine {
            method,
            amount_cents: amount.cents(),
            tendered_cents: None,
            change_cents: None,
            reference,
        });
        Ok(())
    }

    /// Records a single-tender payment of the whole total.
    ///
    /// Overpay is allowed here: the applied amount is the total and the
    /// excess comes back as change. Undertendering is a shortfall. Returns
    /// the change owed.
    pub fn tender_single(
        &mut self,
        method: TenderType,
        tendered: Money,
        reference: Option<String>,
    ) -> CoreResult<Money> {
        if !self.payments.is_empty() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "a split settlement is already in progress".to_string(),
            });
        }
        if !tendered.is_positive() && !self.total.is_zero() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: format!("amount must be positive, got {tendered}"),
            });
        }

        if tendered + SETTLEMENT_EPSILON < self.total {
            return Err(CoreError::PaymentShortfall {
                remaining: self.total - tendered,
            });
        }

        let change = (tendered - self.total).max(Money::zero());
        self.payments.push(TenderLine {
            method,
            amount_cents: self.total.cents(),
            tendered_cents: Some(tendered.cents()),
            change_cents: Some(change.cents()),
            reference,
        });
        Ok(change)
    }

    /// Single tender label, or `a+b` joined labels for splits. This is the
    /// serialized `payment_method` an invoice stores.
    pub fn payment_summary(&self) -> String {
        let mut labels: Vec<&str> = Vec::new();
        for payment in &self.payments {
            let label = payment.method.label();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        if labels.is_empty() {
            "none".to_string()
        } else {
            labels.join("+")
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn split(total_cents: i64) -> TenderSplit {
        TenderSplit::new(Money::from_cents(total_cents))
    }

    #[test]
    fn test_split_settles_within_epsilon() {
        // 40 + 35 + 25.01 against 100: one cent over, still settles
        let mut t = split(10000);
        t.add_payment(TenderType::Cash, Money::from_cents(4000), None).unwrap();
        t.add_payment(TenderType::Card, Money::from_cents(3500), None).unwrap();
        assert!(!t.is_settled());

        t.add_payment(TenderType::Upi, Money::from_cents(2501), None).unwrap();
        assert!(t.is_settled());
        assert_eq!(t.remaining(), Money::zero());
        assert!(t.require_settled().is_ok());
    }

    #[test]
    fn test_partial_split_refuses_commit() {
        let mut t = split(10000);
        t.add_payment(TenderType::Cash, Money::from_cents(4000), None).unwrap();
        t.add_payment(TenderType::Card, Money::from_cents(3500), None).unwrap();

        assert_eq!(t.remaining().cents(), 2500);
        let err = t.require_settled().unwrap_err();
        assert!(matches!(
            err,
            CoreError::PaymentShortfall { remaining } if remaining.cents() == 2500
        ));
    }

    #[test]
    fn test_split_overpay_rejected() {
        let mut t = split(10000);
        t.add_payment(TenderType::Cash, Money::from_cents(7500), None).unwrap();

        let err = t
            .add_payment(TenderType::Card, Money::from_cents(2600), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::SplitOverpay { .. }));

        // The rejected payment was not recorded
        assert_eq!(t.total_paid().cents(), 7500);
        assert_eq!(t.payments().len(), 1);
    }

    #[test]
    fn test_split_rejects_non_positive_amounts() {
        let mut t = split(10000);
        assert!(t.add_payment(TenderType::Cash, Money::zero(), None).is_err());
        assert!(t
            .add_payment(TenderType::Cash, Money::from_cents(-500), None)
            .is_err());
        assert!(t.payments().is_empty());
    }

    #[test]
    fn test_single_tender_overpay_becomes_change() {
        let mut t = split(10000);
        let change = t
            .tender_single(TenderType::Cash, Money::from_cents(11000), None)
            .unwrap();

        assert_eq!(change.cents(), 1000);
        assert!(t.is_settled());
        assert_eq!(t.change().cents(), 1000);
        assert_eq!(t.payments()[0].amount_cents, 10000);
        assert_eq!(t.payments()[0].tendered_cents, Some(11000));
    }

    #[test]
    fn test_single_tender_shortfall() {
        let mut t = split(10000);
        let err = t
            .tender_single(TenderType::Cash, Money::from_cents(9000), None)
            .unwrap_err();

        assert!(matches!(
            err,
            CoreError::PaymentShortfall { remaining } if remaining.cents() == 1000
        ));
        assert!(t.payments().is_empty());
    }

    #[test]
    fn test_single_tender_refused_mid_split() {
        let mut t = split(10000);
        t.add_payment(TenderType::Cash, Money::from_cents(4000), None).unwrap();

        assert!(t
            .tender_single(TenderType::Card, Money::from_cents(6000), None)
            .is_err());
    }

    #[test]
    fn test_room_charge_defers_settlement() {
        let mut t = split(10000);
        t.add_payment(TenderType::Cash, Money::from_cents(4000), None).unwrap();
        t.add_payment(
            TenderType::RoomCharge,
            Money::from_cents(6000),
            Some("FOLIO-204".to_string()),
        )
        .unwrap();

        assert!(t.is_settled());
        assert!(t.has_deferred());
        assert_eq!(t.deferred_amount().cents(), 6000);
    }

    #[test]
    fn test_payment_summary_labels() {
        let mut t = split(10000);
        assert_eq!(t.payment_summary(), "none");

        t.add_payment(TenderType::Cash, Money::from_cents(4000), None).unwrap();
        t.add_payment(TenderType::Card, Money::from_cents(3000), None).unwrap();
        t.add_payment(TenderType::Cash, Money::from_cents(3000), None).unwrap();

        assert_eq!(t.payment_summary(), "cash+card");
    }
}
