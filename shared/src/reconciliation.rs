//! Ledger derivations shared by the delivery pipeline, the integrity engine and the
//! correction engine.
//!
//! Stored `remaining_amount` and `current_stock` columns are caches. The functions here are
//! the single definition of how those values are re-derived from the ledger.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AllocationMethod, DeliveryMode, ItemQuantity, MovementType, PurchaseOrder, PurchaseOrderItem,
};
use crate::types::{round_currency, within_tolerance};

/// `total - sum(confirmed delivery amounts)`
pub fn derive_remaining_amount<I>(total_amount: Decimal, confirmed_amounts: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    total_amount - confirmed_amounts.into_iter().sum::<Decimal>()
}

/// `sum(in) - sum(out)` over a product's movement log
pub fn derive_stock<I>(movements: I) -> Decimal
where
    I: IntoIterator<Item = (MovementType, Decimal)>,
{
    movements
        .into_iter()
        .map(|(direction, quantity)| direction.signed(quantity))
        .sum()
}

/// Next delivery sequence given the number of confirmed deliveries already on the order
pub fn next_sequence(confirmed_count: usize) -> i32 {
    confirmed_count as i32 + 1
}

/// Gaps and repeats in an order's delivery sequence numbers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SequenceReport {
    pub missing: Vec<i32>,
    pub duplicated: Vec<i32>,
    /// Values outside `1..=n`, where n is the number of deliveries
    pub out_of_range: Vec<i32>,
}

impl SequenceReport {
    pub fn is_contiguous(&self) -> bool {
        self.missing.is_empty() && self.duplicated.is_empty() && self.out_of_range.is_empty()
    }
}

/// Sequences must be exactly 1..=n with no repeats
pub fn analyze_sequences(sequences: &[i32]) -> SequenceReport {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for seq in sequences {
        *counts.entry(*seq).or_default() += 1;
    }

    // bounded by the row count, not by the largest stored value
    let expected_max = i32::try_from(sequences.len()).unwrap_or(i32::MAX);
    let missing = (1..=expected_max).filter(|s| !counts.contains_key(s)).collect();

    let mut out_of_range: Vec<i32> = counts
        .keys()
        .copied()
        .filter(|seq| *seq < 1 || *seq > expected_max)
        .collect();
    out_of_range.sort_unstable();

    let mut duplicated: Vec<i32> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(seq, _)| seq)
        .collect();
    duplicated.sort_unstable();

    SequenceReport {
        missing,
        duplicated,
        out_of_range,
    }
}

// ============================================================================
// Duplicate submission heuristic
// ============================================================================

/// Time/amount window used to suppress near-duplicate submissions
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicatePolicy {
    /// How far back recent deliveries are read
    pub lookback: Duration,
    /// Creation age under which a similar delivery counts as a duplicate
    pub window: Duration,
    pub amount_tolerance: Decimal,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            lookback: Duration::seconds(30),
            window: Duration::seconds(10),
            amount_tolerance: Decimal::ONE,
        }
    }
}

impl DuplicatePolicy {
    /// Oldest creation time that needs to be read from the store
    pub fn lookback_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lookback
    }
}

/// Minimal view of a recently confirmed delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentDelivery {
    pub id: Uuid,
    pub delivery_sequence: i32,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// First recent delivery that makes `amount` look like a repeated submission
pub fn find_duplicate<'a>(
    recent: &'a [RecentDelivery],
    amount: Decimal,
    now: DateTime<Utc>,
    policy: &DuplicatePolicy,
) -> Option<&'a RecentDelivery> {
    let lookback_start = policy.lookback_start(now);
    recent.iter().find(|d| {
        d.created_at >= lookback_start
            && now - d.created_at <= policy.window
            && within_tolerance(d.amount, amount, policy.amount_tolerance)
    })
}

// ============================================================================
// Order snapshot
// ============================================================================

/// Line item with its delivered quantity and the product's stock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemState {
    pub item: PurchaseOrderItem,
    pub delivered_quantity: Decimal,
    pub product_stock: Decimal,
}

impl ItemState {
    pub fn remaining_quantity(&self) -> Decimal {
        self.item.quantity - self.delivered_quantity
    }
}

/// Order state re-derived from the ledger, read under the order lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order: PurchaseOrder,
    pub items: Vec<ItemState>,
    /// Sum of confirmed delivery amounts
    pub delivered_amount: Decimal,
    pub confirmed_deliveries: usize,
}

impl OrderSnapshot {
    pub fn remaining_amount(&self) -> Decimal {
        derive_remaining_amount(self.order.total_amount, [self.delivered_amount])
    }

    pub fn next_sequence(&self) -> i32 {
        next_sequence(self.confirmed_deliveries)
    }

    pub fn item(&self, item_id: Uuid) -> Option<&ItemState> {
        self.items.iter().find(|i| i.item.id == item_id)
    }

    /// The stored cache agrees with the ledger
    pub fn cache_in_sync(&self) -> bool {
        self.order.remaining_amount == self.remaining_amount()
    }
}

// ============================================================================
// Allocation planning
// ============================================================================

/// Stock movement the allocator will write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedMovement {
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
}

/// Accounting allocation the allocator will write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedAllocation {
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub allocated_amount: Decimal,
    pub allocation_ratio: Decimal,
    pub method: AllocationMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllocationPlan {
    pub ratio: Decimal,
    pub movements: Vec<PlannedMovement>,
    pub allocations: Vec<PlannedAllocation>,
}

impl AllocationPlan {
    pub fn stock_deltas(&self) -> HashMap<Uuid, Decimal> {
        let mut deltas: HashMap<Uuid, Decimal> = HashMap::new();
        for m in &self.movements {
            *deltas.entry(m.product_id).or_default() += m.movement_type.signed(m.quantity);
        }
        deltas
    }
}

/// `delivered / order_total`, zero when the order total is not positive
pub fn allocation_ratio(delivered_amount: Decimal, order_total: Decimal) -> Decimal {
    if order_total <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        delivered_amount / order_total
    }
}

/// Compute the movements and allocations a recorded delivery materializes into.
///
/// `quantities` are the per-item quantities persisted on the delivery at recording time;
/// for full deliveries the validator has already filled them with each item's remaining
/// quantity, so re-planning a retried delivery yields the same result.
pub fn plan_allocation(
    order_total: Decimal,
    items: &[PurchaseOrderItem],
    delivery_amount: Decimal,
    mode: DeliveryMode,
    quantities: &[ItemQuantity],
) -> AllocationPlan {
    let ratio = allocation_ratio(delivery_amount, order_total);
    let stored_ratio = ratio.round_dp(8);

    let allocations = items
        .iter()
        .map(|item| PlannedAllocation {
            order_item_id: item.id,
            product_id: item.product_id,
            allocated_amount: round_currency(item.total_amount * ratio),
            allocation_ratio: stored_ratio,
            method: AllocationMethod::Ratio,
        })
        .collect();

    let movements = if mode.moves_stock() {
        items
            .iter()
            .filter_map(|item| {
                let quantity: Decimal = quantities
                    .iter()
                    .filter(|q| q.item_id == item.id)
                    .map(|q| q.quantity)
                    .sum();
                (quantity > Decimal::ZERO).then(|| PlannedMovement {
                    order_item_id: item.id,
                    product_id: item.product_id,
                    movement_type: MovementType::In,
                    quantity,
                    unit_price: item.unit_price,
                    total_amount: quantity * item.unit_price,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    AllocationPlan {
        ratio: stored_ratio,
        movements,
        allocations,
    }
}
