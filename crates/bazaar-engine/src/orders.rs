//! # Order Desk
//!
//! Table, room and walk-in orders from placement to billing: menu lookups,
//! mirror-stock checks, station tickets and the combined bill.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  place_order / append_items          update_status                      │
//! │        │                                  │                             │
//! │        ▼                                  ▼                             │
//! │    Pending ──────► Preparing ──────► Ready ──────► Served               │
//! │        │                                │             │                 │
//! │        │ cancel_order                   └──────┬──────┘                 │
//! │        ▼ (restocks)                            ▼                        │
//! │    Cancelled                              bill_orders ──► Billed        │
//! │                                           (one invoice, many orders)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ticket Fan-out
//! Placement and appends cut one ticket per station, carrying only that
//! station's items. Ticket delivery failures are logged and swallowed: the
//! order row is the record, paper can be re-run.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use bazaar_core::validation::{validate_discount_bps, validate_quantity};
use bazaar_core::{
    CoreError, Invoice, Money, Order, OrderItem, OrderStatus, PaymentStatus, SaleTotals,
    ServiceContext, Station, TenderSplit, TenderType, ValidationError,
};
use bazaar_db::{BillingRun, Database, OrderDraft, OrderLine};

use crate::checkout::dispatch_receipt;
use crate::config::PosConfig;
use crate::error::{EngineError, EngineResult};
use crate::sinks::{FolioCharge, FolioPoster, KitchenTicket, ReceiptSink, TicketItem, TicketSink};

// =============================================================================
// Requests
// =============================================================================

/// A new order as taken at the table or counter.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// Where the order is served.
    pub context: ServiceContext,
    /// Waiter taking the order.
    pub waiter_id: String,
    pub waiter_name: String,
    /// Order-level discount in basis points.
    pub discount_bps: u32,
    pub lines: Vec<OrderItemRequest>,
}

/// One requested line, by menu item.
#[derive(Debug, Clone)]
pub struct OrderItemRequest {
    pub service_item_id: String,
    pub quantity: i64,
    /// Preparation note passed through to the ticket.
    pub note: Option<String>,
}

// =============================================================================
// Order Desk
// =============================================================================

/// Orchestrates the order lifecycle for served venues.
///
/// Like [`crate::checkout::CheckoutService`] the desk is stateless; orders
/// live in storage and every operation works from a fresh load.
pub struct OrderDesk {
    db: Arc<Database>,
    config: PosConfig,
    tickets: Arc<dyn TicketSink>,
    receipts: Arc<dyn ReceiptSink>,
    folio: Arc<dyn FolioPoster>,
}

impl OrderDesk {
    /// Creates a new OrderDesk.
    pub fn new(
        db: Arc<Database>,
        config: PosConfig,
        tickets: Arc<dyn TicketSink>,
        receipts: Arc<dyn ReceiptSink>,
        folio: Arc<dyn FolioPoster>,
    ) -> Self {
        OrderDesk {
            db,
            config,
            tickets,
            receipts,
            folio,
        }
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Places a new order and cuts station tickets.
    ///
    /// Menu prices, names and stations are frozen into the order at this
    /// point, as is the effective tax rate. Lines whose menu items mirror a
    /// stock product are checked against availability before anything is
    /// written; the committer re-validates inside its transaction.
    pub async fn place_order(&self, request: PlaceOrder) -> EngineResult<Order> {
        validate_discount_bps(request.discount_bps).map_err(CoreError::from)?;
        let lines = self.resolve_lines(&request.lines).await?;
        self.ensure_line_stock(&lines).await?;

        let draft = OrderDraft {
            context: request.context,
            waiter_id: request.waiter_id,
            waiter_name: request.waiter_name,
            tax_rate_bps: self.config.effective_tax_rate_bps(),
            discount_bps: request.discount_bps,
            lines: lines.clone(),
        };

        let order = self.db.checkout().place_order(draft).await?;
        info!(
            order = %order.order_number,
            context = %order.context,
            lines = lines.len(),
            total_cents = order.total_cents,
            "Order placed"
        );

        self.dispatch_tickets(&order, &lines).await;
        Ok(order)
    }

    /// Appends items to an open order and cuts tickets for the new lines
    /// only; the stations already hold paper for the rest.
    pub async fn append_items(
        &self,
        order_id: &str,
        requests: &[OrderItemRequest],
    ) -> EngineResult<Order> {
        let order = self.load_order(order_id).await?;
        order.validate_accepts_items()?;

        let lines = self.resolve_lines(requests).await?;
        self.ensure_line_stock(&lines).await?;

        let updated = self.db.checkout().append_items(order_id, lines.clone()).await?;
        info!(
            order = %updated.order_number,
            added = lines.len(),
            total_cents = updated.total_cents,
            "Order items appended"
        );

        self.dispatch_tickets(&updated, &lines).await;
        Ok(updated)
    }

    // =========================================================================
    // Kitchen Flow
    // =========================================================================

    /// Advances an order one step along the kitchen flow.
    ///
    /// Only preparation statuses are reachable here. Billing runs through
    /// [`Self::bill_orders`] and cancellation through
    /// [`Self::cancel_order`], both of which have side effects a bare
    /// status write would skip.
    pub async fn update_status(&self, order_id: &str, to: OrderStatus) -> EngineResult<Order> {
        let order = self.load_order(order_id).await?;

        if matches!(to, OrderStatus::Billed | OrderStatus::Cancelled) {
            return Err(CoreError::InvalidTransition {
                order_id: order.id,
                from: order.status,
                to,
            }
            .into());
        }

        order.validate_transition(to)?;
        self.db
            .orders()
            .update_status(&order.id, order.status, to)
            .await?;
        info!(order = %order.order_number, from = %order.status, to = %to, "Order status updated");

        self.load_order(order_id).await
    }

    /// Cancels an order and returns its mirrored stock to the shelves.
    pub async fn cancel_order(&self, order_id: &str) -> EngineResult<Order> {
        let order = self.load_order(order_id).await?;
        order.validate_transition(OrderStatus::Cancelled)?;

        let cancelled = self.db.checkout().cancel_order(order_id).await?;
        info!(order = %cancelled.order_number, "Order cancelled, linked stock returned");
        Ok(cancelled)
    }

    // =========================================================================
    // Billing
    // =========================================================================

    /// Totals a prospective billing run without writing anything.
    ///
    /// Each order's frozen totals are summed component-wise, so per-order
    /// rounding is preserved exactly as it will appear on the invoice.
    pub async fn billing_due(&self, order_ids: &[String]) -> EngineResult<SaleTotals> {
        let orders = self.load_billable(order_ids).await?;
        Ok(combined_totals(&orders))
    }

    /// Bills one or more orders into a single invoice.
    ///
    /// The tender target must equal the combined due. An outstanding
    /// remainder is posted to `folio_ref` when one is given; without a
    /// folio the tender has to settle in full. The folio posting happens
    /// before the local commit and is reversed if the commit fails.
    pub async fn bill_orders(
        &self,
        order_ids: &[String],
        mut tender: TenderSplit,
        folio_ref: Option<&str>,
    ) -> EngineResult<Invoice> {
        let orders = self.load_billable(order_ids).await?;
        let due = combined_totals(&orders);

        if tender.total().cents() != due.total_cents {
            return Err(CoreError::InvalidPaymentAmount {
                reason: format!(
                    "tender target {} does not match the combined bill of {}",
                    tender.total(),
                    Money::from_cents(due.total_cents)
                ),
            }
            .into());
        }
        if tender.has_deferred() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "room charges must post through a folio".to_string(),
            }
            .into());
        }

        // (folio_ref, posting_id) once the remainder has been posted
        let mut posting: Option<(String, String)> = None;
        let remaining = tender.remaining();
        if remaining.is_positive() {
            if let Some(folio) = folio_ref {
                let charge = FolioCharge {
                    folio_ref: folio.to_string(),
                    amount_cents: remaining.cents(),
                    description: format!("{} order billing", self.config.store_name()),
                };
                let posting_id = self.folio.post_charge(&charge).await?;
                info!(
                    folio_ref = folio,
                    posting_id = %posting_id,
                    amount_cents = charge.amount_cents,
                    "Folio charge posted"
                );
                tender.add_payment(TenderType::RoomCharge, remaining, Some(posting_id.clone()))?;
                posting = Some((folio.to_string(), posting_id));
            }
        }
        tender.require_settled()?;

        let run = BillingRun {
            order_ids: orders.iter().map(|o| o.id.clone()).collect(),
            payment_method: tender.payment_summary(),
            payments: tender.payments().to_vec(),
            payment_status: if tender.has_deferred() {
                PaymentStatus::Pending
            } else {
                PaymentStatus::Paid
            },
            folio_ref: posting.as_ref().map(|(folio, _)| folio.clone()),
        };

        match self.db.checkout().bill_orders(run).await {
            Ok(invoice) => {
                info!(
                    invoice = %invoice.invoice_number,
                    orders = orders.len(),
                    total_cents = invoice.total_cents,
                    "Orders billed"
                );
                dispatch_receipt(&self.db, &self.config, self.receipts.as_ref(), &invoice).await;
                Ok(invoice)
            }
            Err(err) => {
                warn!(error = %err, "Billing run failed");
                if let Some((folio, posting_id)) = posting {
                    if let Err(reversal_err) = self.folio.reverse_charge(&posting_id).await {
                        error!(
                            folio_ref = %folio,
                            posting_id = %posting_id,
                            error = %reversal_err,
                            "Folio reversal failed after a failed billing run"
                        );
                        return Err(EngineError::CommitPartialFailure {
                            folio_ref: folio,
                            posting_id,
                            reason: format!("{err}; reversal: {reversal_err}"),
                        });
                    }
                    info!(posting_id = %posting_id, "Folio charge reversed");
                }
                Err(err.into())
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// All open orders, oldest first.
    pub async fn list_open(&self) -> EngineResult<Vec<Order>> {
        Ok(self.db.orders().list_open().await?)
    }

    /// Open orders held by one waiter.
    pub async fn list_open_for_waiter(&self, waiter_id: &str) -> EngineResult<Vec<Order>> {
        Ok(self.db.orders().list_open_for_waiter(waiter_id).await?)
    }

    /// An order with its lines.
    pub async fn get_order(&self, order_id: &str) -> EngineResult<(Order, Vec<OrderItem>)> {
        let order = self.load_order(order_id).await?;
        let items = self.db.orders().get_items(order_id).await?;
        Ok((order, items))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load_order(&self, order_id: &str) -> EngineResult<Order> {
        self.db
            .orders()
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| EngineError::from(CoreError::OrderNotFound(order_id.to_string())))
    }

    /// Loads, deduplicates and policy-checks the orders behind a billing run.
    async fn load_billable(&self, order_ids: &[String]) -> EngineResult<Vec<Order>> {
        if order_ids.is_empty() {
            return Err(CoreError::Validation(ValidationError::Required {
                field: "order ids".to_string(),
            })
            .into());
        }

        let mut unique: Vec<&str> = Vec::with_capacity(order_ids.len());
        for id in order_ids {
            if !unique.contains(&id.as_str()) {
                unique.push(id);
            }
        }

        let mut orders = Vec::with_capacity(unique.len());
        for id in unique {
            let order = self.load_order(id).await?;
            order.validate_billable(self.config.billing_policy())?;
            orders.push(order);
        }
        Ok(orders)
    }

    /// Resolves requested lines against the active menu, freezing names,
    /// stations and prices.
    async fn resolve_lines(&self, requests: &[OrderItemRequest]) -> EngineResult<Vec<OrderLine>> {
        if requests.is_empty() {
            return Err(CoreError::Validation(ValidationError::Required {
                field: "order items".to_string(),
            })
            .into());
        }

        let mut lines = Vec::with_capacity(requests.len());
        for request in requests {
            validate_quantity(request.quantity).map_err(CoreError::from)?;

            let item = self
                .db
                .service_items()
                .get_by_id(&request.service_item_id)
                .await?
                .filter(|i| i.is_active)
                .ok_or_else(|| CoreError::ServiceItemNotFound(request.service_item_id.clone()))?;

            lines.push(OrderLine {
                service_item_id: item.id,
                name_snapshot: item.name,
                station: item.station,
                unit_price_cents: item.selling_price_cents,
                quantity: request.quantity,
                note: request.note.clone(),
                stock_product_id: item.linked_product_id,
            });
        }
        Ok(lines)
    }

    /// Advisory availability check for lines that mirror stock products,
    /// aggregated per product so two gin lines cannot each pass alone.
    async fn ensure_line_stock(&self, lines: &[OrderLine]) -> EngineResult<()> {
        let mut demands: BTreeMap<&str, (i64, &str)> = BTreeMap::new();
        for line in lines {
            if let Some(product_id) = line.stock_product_id.as_deref() {
                let entry = demands
                    .entry(product_id)
                    .or_insert((0, line.name_snapshot.as_str()));
                entry.0 += line.quantity;
            }
        }

        for (product_id, (requested, name)) in demands {
            let available = self.db.batches().available_quantity(product_id).await?;
            if requested > available {
                debug!(product_id, available, requested, "Order stock check failed");
                return Err(CoreError::InsufficientStock {
                    product: name.to_string(),
                    available,
                    requested,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn dispatch_tickets(&self, order: &Order, lines: &[OrderLine]) {
        for ticket in tickets_for(order, lines) {
            if let Err(err) = self.tickets.deliver(&ticket).await {
                warn!(
                    order = %order.order_number,
                    station = ?ticket.station,
                    error = %err,
                    "Kitchen ticket delivery failed"
                );
            }
        }
    }
}

// =============================================================================
// Ticket Fan-out
// =============================================================================

/// Splits lines into one ticket per station, skipping stations with nothing
/// to make.
fn tickets_for(order: &Order, lines: &[OrderLine]) -> Vec<KitchenTicket> {
    let mut tickets = Vec::new();
    for station in [Station::Kitchen, Station::Bar] {
        let items: Vec<TicketItem> = lines
            .iter()
            .filter(|line| line.station == station)
            .map(|line| TicketItem {
                name: line.name_snapshot.clone(),
                quantity: line.quantity,
                note: line.note.clone(),
            })
            .collect();

        if !items.is_empty() {
            tickets.push(KitchenTicket {
                order_number: order.order_number.clone(),
                station,
                context: order.context.clone(),
                waiter_name: order.waiter_name.clone(),
                items,
                placed_at: order.updated_at,
            });
        }
    }
    tickets
}

/// Component-wise sum of frozen per-order totals.
fn combined_totals(orders: &[Order]) -> SaleTotals {
    SaleTotals {
        subtotal_cents: orders.iter().map(|o| o.subtotal_cents).sum(),
        discount_cents: orders.iter().map(|o| o.discount_cents).sum(),
        tax_cents: orders.iter().map(|o| o.tax_cents).sum(),
        total_cents: orders.iter().map(|o| o.total_cents).sum(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
