//! # Collaborator Sinks
//!
//! The boundary between the engine and the outside hardware/services:
//! kitchen ticket printers, receipt printers and the folio system of a
//! hotel PMS. The engine talks to all of them through async traits and
//! never knows what is on the other side.
//!
//! ## Boundary Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sink Boundary                                    │
//! │                                                                         │
//! │   bazaar-engine                        implementations                  │
//! │  ┌──────────────┐    KitchenTicket    ┌──────────────────────┐          │
//! │  │  OrderDesk   │ ──────────────────▶ │ printer / KDS / …    │          │
//! │  └──────────────┘                     └──────────────────────┘          │
//! │  ┌──────────────┐    ReceiptSnapshot  ┌──────────────────────┐          │
//! │  │CheckoutService│──────────────────▶ │ printer / email / …  │          │
//! │  └──────────────┘                     └──────────────────────┘          │
//! │  ┌──────────────┐    FolioCharge      ┌──────────────────────┐          │
//! │  │CheckoutService│◀─────────────────▶ │ PMS folio ledger     │          │
//! │  └──────────────┘  posting id back    └──────────────────────┘          │
//! │                                                                         │
//! │  Tickets and receipts are fire-and-forget: a failure is logged and     │
//! │  the sale stands. Folio postings are transactional collaborators:      │
//! │  they can refuse a charge, and a posted charge gets reversed when      │
//! │  the local commit fails.                                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `Memory*` implementations ship with the engine so embedders and
//! tests can run the full checkout flow without hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use bazaar_core::{Invoice, InvoiceItem, InvoicePayment, ServiceContext, Station};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Payloads
// =============================================================================

/// One line on a kitchen ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketItem {
    /// Item name as ordered (frozen snapshot).
    pub name: String,
    /// Units ordered.
    pub quantity: i64,
    /// Preparation note ("no onions").
    pub note: Option<String>,
}

/// A ticket routed to one preparation station.
///
/// Tickets carry only the items for their station: a mixed food-and-drinks
/// order produces one kitchen ticket and one bar ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KitchenTicket {
    /// Human-facing order number.
    pub order_number: String,
    /// Station this ticket is for.
    pub station: Station,
    /// Table, room or walk-in.
    pub context: ServiceContext,
    /// Waiter who placed the order.
    pub waiter_name: String,
    /// Items for this station only.
    pub items: Vec<TicketItem>,
    /// When the items were ordered.
    pub placed_at: DateTime<Utc>,
}

/// Everything a receipt renderer needs, resolved up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptSnapshot {
    /// The committed invoice.
    pub invoice: Invoice,
    /// Invoice lines.
    pub items: Vec<InvoiceItem>,
    /// Payments applied.
    pub payments: Vec<InvoicePayment>,
    /// Store name for the header.
    pub store_name: String,
    /// Currency symbol for amount formatting.
    pub currency_symbol: String,
    /// True when this is a reprint of an earlier receipt.
    pub reprint: bool,
}

/// A charge to post against an external folio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolioCharge {
    /// Folio to charge (room number, account id).
    pub folio_ref: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Line description shown on the folio.
    pub description: String,
}

// =============================================================================
// Sink Traits
// =============================================================================

/// Delivers kitchen tickets to a station.
#[async_trait]
pub trait TicketSink: Send + Sync {
    /// Delivers one ticket. Implementations should queue internally;
    /// the engine treats a returned error as "lost ticket, reprint by hand"
    /// and logs it without failing the order.
    async fn deliver(&self, ticket: &KitchenTicket) -> EngineResult<()>;
}

/// Renders customer receipts.
#[async_trait]
pub trait ReceiptSink: Send + Sync {
    /// Prints (or emails, or displays) one receipt.
    async fn print(&self, receipt: &ReceiptSnapshot) -> EngineResult<()>;
}

/// Posts charges to an external folio ledger.
///
/// Unlike the print sinks this collaborator takes part in the sale's
/// outcome: posting happens before the local commit, and the returned
/// posting id is what a failed commit reverses.
#[async_trait]
pub trait FolioPoster: Send + Sync {
    /// Posts a charge and returns the ledger's posting id.
    async fn post_charge(&self, charge: &FolioCharge) -> EngineResult<String>;

    /// Reverses an earlier posting.
    async fn reverse_charge(&self, posting_id: &str) -> EngineResult<()>;
}

// =============================================================================
// In-Memory Implementations
// =============================================================================

/// Ticket sink that records tickets in memory.
#[derive(Debug, Default)]
pub struct MemoryTicketSink {
    tickets: Mutex<Vec<KitchenTicket>>,
    fail: AtomicBool,
}

impl MemoryTicketSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose deliveries always fail, for exercising the WARN path.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::Relaxed);
        sink
    }

    /// Tickets delivered so far.
    pub async fn tickets(&self) -> Vec<KitchenTicket> {
        self.tickets.lock().await.clone()
    }
}

#[async_trait]
impl TicketSink for MemoryTicketSink {
    async fn deliver(&self, ticket: &KitchenTicket) -> EngineResult<()> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(EngineError::SinkFailed {
                sink: "ticket",
                message: "printer offline".to_string(),
            });
        }
        self.tickets.lock().await.push(ticket.clone());
        Ok(())
    }
}

/// Receipt sink that records snapshots in memory.
#[derive(Debug, Default)]
pub struct MemoryReceiptSink {
    receipts: Mutex<Vec<ReceiptSnapshot>>,
    fail: AtomicBool,
}

impl MemoryReceiptSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose prints always fail.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::Relaxed);
        sink
    }

    /// Receipts printed so far.
    pub async fn receipts(&self) -> Vec<ReceiptSnapshot> {
        self.receipts.lock().await.clone()
    }
}

#[async_trait]
impl ReceiptSink for MemoryReceiptSink {
    async fn print(&self, receipt: &ReceiptSnapshot) -> EngineResult<()> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(EngineError::SinkFailed {
                sink: "receipt",
                message: "printer offline".to_string(),
            });
        }
        self.receipts.lock().await.push(receipt.clone());
        Ok(())
    }
}

/// Folio poster backed by an in-memory ledger.
///
/// Posting ids are sequential (`post-1`, `post-2`, …) so tests can assert
/// on them. The failure knobs cover the two interesting refusal modes:
/// rejecting charges outright, and accepting charges but failing reversals.
#[derive(Debug, Default)]
pub struct MemoryFolioPoster {
    postings: Mutex<Vec<(String, FolioCharge)>>,
    reversals: Mutex<Vec<String>>,
    next_id: AtomicU64,
    reject_charges: AtomicBool,
    fail_reversals: AtomicBool,
}

impl MemoryFolioPoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A poster that refuses every charge.
    pub fn rejecting() -> Self {
        let poster = Self::default();
        poster.reject_charges.store(true, Ordering::Relaxed);
        poster
    }

    /// A poster that accepts charges but cannot reverse them.
    pub fn with_failing_reversals() -> Self {
        let poster = Self::default();
        poster.fail_reversals.store(true, Ordering::Relaxed);
        poster
    }

    /// Charges posted so far, as (posting id, charge) pairs.
    pub async fn postings(&self) -> Vec<(String, FolioCharge)> {
        self.postings.lock().await.clone()
    }

    /// Posting ids that were reversed.
    pub async fn reversals(&self) -> Vec<String> {
        self.reversals.lock().await.clone()
    }
}

#[async_trait]
impl FolioPoster for MemoryFolioPoster {
    async fn post_charge(&self, charge: &FolioCharge) -> EngineResult<String> {
        if self.reject_charges.load(Ordering::Relaxed) {
            return Err(EngineError::FolioRejected {
                reason: format!("folio {} refused the charge", charge.folio_ref),
            });
        }

        let posting_id = format!("post-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.postings
            .lock()
            .await
            .push((posting_id.clone(), charge.clone()));
        Ok(posting_id)
    }

    async fn reverse_charge(&self, posting_id: &str) -> EngineResult<()> {
        if self.fail_reversals.load(Ordering::Relaxed) {
            return Err(EngineError::SinkFailed {
                sink: "folio",
                message: "reversal channel unavailable".to_string(),
            });
        }

        let known = self
            .postings
            .lock()
            .await
            .iter()
            .any(|(id, _)| id == posting_id);
        if !known {
            return Err(EngineError::SinkFailed {
                sink: "folio",
                message: format!("unknown posting {posting_id}"),
            });
        }

        self.reversals.lock().await.push(posting_id.to_string());
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn charge(folio_ref: &str, cents: i64) -> FolioCharge {
        FolioCharge {
            folio_ref: folio_ref.to_string(),
            amount_cents: cents,
            description: "POS sale".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_poster_issues_sequential_ids() {
        let poster = MemoryFolioPoster::new();
        let first = poster.post_charge(&charge("F-101", 5000)).await.unwrap();
        let second = poster.post_charge(&charge("F-102", 2500)).await.unwrap();

        assert_eq!(first, "post-1");
        assert_eq!(second, "post-2");
        assert_eq!(poster.postings().await.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_poster_reverses_known_postings_only() {
        let poster = MemoryFolioPoster::new();
        let id = poster.post_charge(&charge("F-101", 5000)).await.unwrap();

        poster.reverse_charge(&id).await.unwrap();
        assert_eq!(poster.reversals().await, vec![id]);

        let err = poster.reverse_charge("post-99").await.unwrap_err();
        assert!(matches!(err, EngineError::SinkFailed { sink: "folio", .. }));
    }

    #[tokio::test]
    async fn test_rejecting_poster_names_the_folio() {
        let poster = MemoryFolioPoster::rejecting();
        let err = poster.post_charge(&charge("F-204", 1000)).await.unwrap_err();
        match err {
            EngineError::FolioRejected { reason } => assert!(reason.contains("F-204")),
            other => panic!("expected FolioRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_ticket_sink_reports_its_name() {
        let sink = MemoryTicketSink::failing();
        let ticket = KitchenTicket {
            order_number: "ORD-20250101-0001".to_string(),
            station: Station::Kitchen,
            context: ServiceContext::Table("5".to_string()),
            waiter_name: "Asha".to_string(),
            items: vec![TicketItem {
                name: "Dal Fry".to_string(),
                quantity: 2,
                note: None,
            }],
            placed_at: Utc::now(),
        };

        let err = sink.deliver(&ticket).await.unwrap_err();
        assert!(matches!(err, EngineError::SinkFailed { sink: "ticket", .. }));
        assert!(sink.tickets().await.is_empty());
    }

    #[test]
    fn test_ticket_payload_serializes_snake_case() {
        let ticket = KitchenTicket {
            order_number: "ORD-20250101-0001".to_string(),
            station: Station::Bar,
            context: ServiceContext::Room("204".to_string()),
            waiter_name: "Ravi".to_string(),
            items: vec![],
            placed_at: Utc::now(),
        };

        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["station"], "bar");
        assert_eq!(json["context"]["kind"], "room");
        assert_eq!(json["context"]["ref"], "204");
    }
}
