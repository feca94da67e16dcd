//! # Batch Allocation (FEFO)
//!
//! Pure planning of which batches a sale draws from.
//!
//! ## Ordering Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  FEFO: First-Expire-First-Out                                           │
//! │                                                                         │
//! │  Batches:  [10 @ no expiry]  [5 @ 2024-01-01]  [3 @ 2024-02-01]        │
//! │                                                                         │
//! │  Sorted:   [5 @ 2024-01-01] → [3 @ 2024-02-01] → [10 @ no expiry]      │
//! │             earliest expiry     next expiry        non-perishable last  │
//! │                                                                         │
//! │  allocate(6):  draw 5 from the first, 1 from the second                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ties on expiry date break by received date, then id, so planning over the
//! same snapshot is deterministic.
//!
//! ## Purity
//! `plan_fefo` never mutates anything. The committer re-runs it inside its
//! transaction and applies the plan with conditional decrements; a cart uses
//! it to answer "can this quantity be fulfilled right now".

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::ProductBatch;

// =============================================================================
// Plan Types
// =============================================================================

/// One batch draw within an allocation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocation {
    /// Batch to decrement.
    pub batch_id: String,
    /// Units to draw from that batch, always positive.
    pub quantity: i64,
}

/// The result of planning a FEFO draw for one product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPlan {
    /// Product the plan is for.
    pub product_id: String,
    /// Units requested.
    pub requested: i64,
    /// Total units available across the product's batches.
    pub available: i64,
    /// Greedy FEFO draws; partial when availability falls short.
    pub allocations: Vec<BatchAllocation>,
}

impl AllocationPlan {
    /// True when availability covers the request. Only a fulfillable plan
    /// may proceed to commit.
    #[inline]
    pub fn can_fulfill(&self) -> bool {
        self.available >= self.requested
    }

    /// Sum of planned draws.
    pub fn allocated_total(&self) -> i64 {
        self.allocations.iter().map(|a| a.quantity).sum()
    }

    /// Units the request is short by (zero when fulfillable).
    #[inline]
    pub fn shortfall(&self) -> i64 {
        (self.requested - self.available).max(0)
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Plans a FEFO draw of `requested` units of `product_id` from `batches`.
///
/// Batches of other products and batches with no remaining quantity are
/// ignored. Eligible batches are consumed earliest-expiry-first with
/// no-expiry batches last; ties break by received date, then id.
///
/// A non-positive request yields an empty, trivially fulfillable plan.
///
/// ## Example
/// ```rust
/// use bazaar_core::allocation::plan_fefo;
/// # use bazaar_core::types::ProductBatch;
/// # use chrono::{NaiveDate, Utc};
/// # fn batch(id: &str, qty: i64, expiry: Option<NaiveDate>) -> ProductBatch {
/// #     ProductBatch {
/// #         id: id.into(),
/// #         product_id: "p1".into(),
/// #         batch_number: id.to_uppercase(),
/// #         quantity: qty,
/// #         purchase_price_cents: 100,
/// #         selling_price_cents: 150,
/// #         expiry_date: expiry,
/// #         received_at: Utc::now(),
/// #         created_at: Utc::now(),
/// #     }
/// # }
/// let batches = vec![
///     batch("b1", 5, NaiveDate::from_ymd_opt(2024, 1, 1)),
///     batch("b2", 3, NaiveDate::from_ymd_opt(2024, 2, 1)),
///     batch("b3", 10, None),
/// ];
///
/// let plan = plan_fefo("p1", &batches, 6);
/// assert!(plan.can_fulfill());
/// assert_eq!(plan.allocations[0].quantity, 5); // b1 drained first
/// assert_eq!(plan.allocations[1].quantity, 1); // remainder from b2
/// ```
pub fn plan_fefo(product_id: &str, batches: &[ProductBatch], requested: i64) -> AllocationPlan {
    let mut candidates: Vec<&ProductBatch> = batches
        .iter()
        .filter(|b| b.product_id == product_id && b.has_stock())
        .collect();

    candidates.sort_by(|a, b| {
        expiry_order(a, b)
            .then_with(|| a.received_at.cmp(&b.received_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let available: i64 = candidates.iter().map(|b| b.quantity).sum();

    let mut allocations = Vec::new();
    let mut remaining = requested.max(0);
    for batch in candidates {
        if remaining == 0 {
            break;
        }
        let take = batch.quantity.min(remaining);
        allocations.push(BatchAllocation {
            batch_id: batch.id.clone(),
            quantity: take,
        });
        remaining -= take;
    }

    AllocationPlan {
        product_id: product_id.to_string(),
        requested: requested.max(0),
        available,
        allocations,
    }
}

/// Earliest expiry first; batches without expiry sort last.
fn expiry_order(a: &ProductBatch, b: &ProductBatch) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, Utc};
    use proptest::prelude::*;

    fn batch_at(id: &str, qty: i64, expiry: Option<NaiveDate>, received: i64) -> ProductBatch {
        ProductBatch {
            id: id.to_string(),
            product_id: "p1".to_string(),
            batch_number: format!("LOT-{id}"),
            quantity: qty,
            purchase_price_cents: 100,
            selling_price_cents: 150,
            expiry_date: expiry,
            received_at: DateTime::from_timestamp(received, 0).unwrap(),
            created_at: Utc::now(),
        }
    }

    fn batch(id: &str, qty: i64, expiry: Option<NaiveDate>) -> ProductBatch {
        batch_at(id, qty, expiry, 0)
    }

    fn day(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_fefo_earliest_expiry_first_nulls_last() {
        let batches = vec![
            batch("b3", 10, None),
            batch("b1", 5, day(2024, 1, 1)),
            batch("b2", 3, day(2024, 2, 1)),
        ];

        let plan = plan_fefo("p1", &batches, 6);
        assert!(plan.can_fulfill());
        assert_eq!(plan.available, 18);
        assert_eq!(
            plan.allocations,
            vec![
                BatchAllocation {
                    batch_id: "b1".into(),
                    quantity: 5
                },
                BatchAllocation {
                    batch_id: "b2".into(),
                    quantity: 1
                },
            ]
        );
    }

    #[test]
    fn test_fefo_spills_into_no_expiry_batches() {
        let batches = vec![batch("b1", 2, day(2024, 1, 1)), batch("b2", 10, None)];

        let plan = plan_fefo("p1", &batches, 7);
        assert!(plan.can_fulfill());
        assert_eq!(plan.allocations.len(), 2);
        assert_eq!(plan.allocations[1].batch_id, "b2");
        assert_eq!(plan.allocations[1].quantity, 5);
    }

    #[test]
    fn test_ties_break_by_received_then_id() {
        let batches = vec![
            batch_at("b2", 4, day(2024, 3, 1), 200),
            batch_at("b1", 4, day(2024, 3, 1), 100),
        ];
        let plan = plan_fefo("p1", &batches, 5);
        assert_eq!(plan.allocations[0].batch_id, "b1");

        // Same expiry, same received moment: id decides
        let batches = vec![
            batch_at("z", 4, None, 50),
            batch_at("a", 4, None, 50),
        ];
        let plan = plan_fefo("p1", &batches, 1);
        assert_eq!(plan.allocations[0].batch_id, "a");
    }

    #[test]
    fn test_insufficient_stock_reports_partial_plan() {
        let batches = vec![batch("b1", 5, day(2024, 1, 1)), batch("b2", 3, day(2024, 2, 1))];

        let plan = plan_fefo("p1", &batches, 20);
        assert!(!plan.can_fulfill());
        assert_eq!(plan.available, 8);
        assert_eq!(plan.shortfall(), 12);
        assert_eq!(plan.allocated_total(), 8);
    }

    #[test]
    fn test_empty_and_foreign_batches_ignored() {
        let mut other = batch("x1", 50, None);
        other.product_id = "p2".to_string();
        let batches = vec![batch("b1", 0, day(2024, 1, 1)), other, batch("b2", 4, None)];

        let plan = plan_fefo("p1", &batches, 4);
        assert!(plan.can_fulfill());
        assert_eq!(plan.available, 4);
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].batch_id, "b2");
    }

    #[test]
    fn test_zero_request_is_trivially_fulfillable() {
        let batches = vec![batch("b1", 5, None)];
        let plan = plan_fefo("p1", &batches, 0);
        assert!(plan.can_fulfill());
        assert!(plan.allocations.is_empty());
    }

    proptest! {
        /// Conservation: a fulfillable plan allocates exactly the request;
        /// an unfulfillable one allocates exactly what exists.
        #[test]
        fn prop_allocation_conservation(
            quantities in proptest::collection::vec(0i64..50, 0..12),
            expiry_offsets in proptest::collection::vec(proptest::option::of(0i64..365), 0..12),
            requested in 0i64..400,
        ) {
            let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            let batches: Vec<ProductBatch> = quantities
                .iter()
                .zip(expiry_offsets.iter().chain(std::iter::repeat(&None)))
                .enumerate()
                .map(|(i, (&qty, &offset))| {
                    batch_at(
                        &format!("b{i}"),
                        qty,
                        offset.map(|d| base + chrono::Duration::days(d)),
                        i as i64,
                    )
                })
                .collect();

            let plan = plan_fefo("p1", &batches, requested);
            let total_stock: i64 = batches.iter().filter(|b| b.has_stock()).map(|b| b.quantity).sum();

            prop_assert_eq!(plan.available, total_stock);
            if plan.can_fulfill() {
                prop_assert_eq!(plan.allocated_total(), requested);
            } else {
                prop_assert_eq!(plan.allocated_total(), total_stock);
            }

            // No draw exceeds its batch, no draw is empty
            for alloc in &plan.allocations {
                let source = batches.iter().find(|b| b.id == alloc.batch_id).unwrap();
                prop_assert!(alloc.quantity > 0);
                prop_assert!(alloc.quantity <= source.quantity);
            }
        }
    }
}
