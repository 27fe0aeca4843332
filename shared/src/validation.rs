//! Validation utilities for the purchase ledger
//!
//! The delivery validator is pure: it checks a proposed delivery against order state that
//! has already been re-derived from the ledger, before anything is written.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    CreateOrderItemInput, DeliveryMode, DeliveryReason, DeliveryRequest, ItemQuantity,
    OrderStatus,
};
use crate::reconciliation::OrderSnapshot;
use crate::types::within_tolerance;

// ============================================================================
// Delivery Validation
// ============================================================================

/// Decimal places stored for monetary amounts
pub const AMOUNT_SCALE: u32 = 2;

/// Decimal places stored for item quantities
pub const QUANTITY_SCALE: u32 = 4;

/// Significant decimal places, ignoring trailing zeros
fn significant_scale(value: Decimal) -> u32 {
    value.normalize().scale()
}

/// What to do when amount and quantities disagree about settling the order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SettlementPolicy {
    #[default]
    Block,
    Warn,
}

/// Tunables for delivery validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Currency units within which an amount counts as the full remaining balance
    pub settlement_tolerance: Decimal,
    pub settlement_policy: SettlementPolicy,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            settlement_tolerance: Decimal::from(5),
            settlement_policy: SettlementPolicy::Block,
        }
    }
}

/// A violated delivery constraint
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryValidationError {
    #[error("Order is {status} and cannot receive deliveries")]
    OrderNotOpen { status: OrderStatus },

    #[error("Order is already fully settled")]
    OrderFullySettled,

    #[error("A scheduled delivery date is required")]
    MissingScheduledDate,

    #[error("Delivery amount must be greater than zero")]
    NonPositiveAmount,

    #[error("Amount {amount} has more than 2 decimal places")]
    AmountTooPrecise { amount: Decimal },

    #[error("Amount {amount} exceeds remaining balance {remaining} by {excess}")]
    ExceedsRemainingBalance {
        amount: Decimal,
        remaining: Decimal,
        excess: Decimal,
    },

    #[error("At least one item must have a positive quantity")]
    NoQuantities,

    #[error("Item {item_id} is not part of this order")]
    UnknownItem { item_id: Uuid },

    #[error("Item {item_id} is listed more than once")]
    DuplicateItem { item_id: Uuid },

    #[error("Quantity for item {item_id} must not be negative")]
    NegativeQuantity { item_id: Uuid },

    #[error("Quantity {quantity} for item {item_id} has more than 4 decimal places")]
    QuantityTooPrecise { item_id: Uuid, quantity: Decimal },

    #[error("Quantity {requested} for item {item_id} exceeds remaining quantity {remaining}")]
    QuantityExceedsRemaining {
        item_id: Uuid,
        requested: Decimal,
        remaining: Decimal,
    },

    #[error(
        "Inconsistent settlement: amount {amount} vs remaining balance {remaining}, \
         all delivered items completed: {items_completed}"
    )]
    SettlementInconsistency {
        amount: Decimal,
        remaining: Decimal,
        items_completed: bool,
    },

    #[error("Insufficient stock for product {product_id}: {available} available, {required} required")]
    InsufficientStock {
        product_id: Uuid,
        available: Decimal,
        required: Decimal,
    },
}

impl DeliveryValidationError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::OrderNotOpen { .. } => "ORDER_NOT_OPEN",
            Self::OrderFullySettled => "ORDER_FULLY_SETTLED",
            Self::MissingScheduledDate => "MISSING_SCHEDULED_DATE",
            Self::NonPositiveAmount => "NON_POSITIVE_AMOUNT",
            Self::AmountTooPrecise { .. } => "AMOUNT_TOO_PRECISE",
            Self::ExceedsRemainingBalance { .. } => "AMOUNT_EXCEEDS_REMAINING",
            Self::NoQuantities => "NO_QUANTITIES",
            Self::UnknownItem { .. } => "UNKNOWN_ITEM",
            Self::DuplicateItem { .. } => "DUPLICATE_ITEM",
            Self::NegativeQuantity { .. } => "NEGATIVE_QUANTITY",
            Self::QuantityTooPrecise { .. } => "QUANTITY_TOO_PRECISE",
            Self::QuantityExceedsRemaining { .. } => "QUANTITY_EXCEEDS_REMAINING",
            Self::SettlementInconsistency { .. } => "SETTLEMENT_INCONSISTENCY",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
        }
    }

    /// Request field the error points at, if any
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::MissingScheduledDate => Some("scheduled_date"),
            Self::NonPositiveAmount
            | Self::AmountTooPrecise { .. }
            | Self::ExceedsRemainingBalance { .. }
            | Self::SettlementInconsistency { .. } => Some("amount"),
            Self::NoQuantities
            | Self::UnknownItem { .. }
            | Self::DuplicateItem { .. }
            | Self::NegativeQuantity { .. }
            | Self::QuantityTooPrecise { .. }
            | Self::QuantityExceedsRemaining { .. } => Some("quantities"),
            _ => None,
        }
    }
}

/// A delivery request that passed validation
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedDelivery {
    pub amount: Decimal,
    pub mode: DeliveryMode,
    /// Quantities that will become stock movements (positive only)
    pub quantities: Vec<ItemQuantity>,
    pub scheduled_date: NaiveDate,
    pub reason: Option<DeliveryReason>,
    pub memo: Option<String>,
    pub idempotency_key: Option<String>,
    /// The delivery brings the remaining balance to zero
    pub settles_order: bool,
    pub warnings: Vec<String>,
}

/// Check a proposed delivery against re-derived order state.
pub fn validate_delivery(
    snapshot: &OrderSnapshot,
    request: &DeliveryRequest,
    policy: &ValidationPolicy,
) -> Result<NormalizedDelivery, DeliveryValidationError> {
    let status = snapshot.order.status;
    if !status.is_open() {
        return Err(DeliveryValidationError::OrderNotOpen { status });
    }

    let scheduled_date = request
        .scheduled_date
        .ok_or(DeliveryValidationError::MissingScheduledDate)?;

    let remaining = snapshot.remaining_amount();
    if remaining <= Decimal::ZERO {
        return Err(DeliveryValidationError::OrderFullySettled);
    }

    let mut warnings = Vec::new();
    let (amount, quantities) = match request.mode {
        DeliveryMode::Full => (remaining, full_quantities(snapshot)?),
        DeliveryMode::AmountOnly => {
            check_amount(request.amount, remaining)?;
            (request.amount, Vec::new())
        }
        DeliveryMode::AmountAndQuantity => {
            check_amount(request.amount, remaining)?;
            let quantities = requested_quantities(snapshot, &request.quantities)?;
            if let Err(err) =
                check_settlement(snapshot, &quantities, request.amount, remaining, policy)
            {
                match policy.settlement_policy {
                    SettlementPolicy::Block => return Err(err),
                    SettlementPolicy::Warn => warnings.push(err.to_string()),
                }
            }
            (request.amount, quantities)
        }
    };

    Ok(NormalizedDelivery {
        amount,
        mode: request.mode,
        quantities,
        scheduled_date,
        reason: request.reason,
        memo: request.memo.clone(),
        idempotency_key: request.idempotency_key.clone(),
        settles_order: amount == remaining,
        warnings,
    })
}

fn check_amount(amount: Decimal, remaining: Decimal) -> Result<(), DeliveryValidationError> {
    if significant_scale(amount) > AMOUNT_SCALE {
        return Err(DeliveryValidationError::AmountTooPrecise { amount });
    }
    if amount <= Decimal::ZERO {
        return Err(DeliveryValidationError::NonPositiveAmount);
    }
    if amount > remaining {
        return Err(DeliveryValidationError::ExceedsRemainingBalance {
            amount,
            remaining,
            excess: amount - remaining,
        });
    }
    Ok(())
}

fn requested_quantities(
    snapshot: &OrderSnapshot,
    requested: &[ItemQuantity],
) -> Result<Vec<ItemQuantity>, DeliveryValidationError> {
    let mut seen = HashSet::new();
    let mut accepted = Vec::new();

    for q in requested {
        if !seen.insert(q.item_id) {
            return Err(DeliveryValidationError::DuplicateItem { item_id: q.item_id });
        }
        let item = snapshot
            .item(q.item_id)
            .ok_or(DeliveryValidationError::UnknownItem { item_id: q.item_id })?;

        if q.quantity < Decimal::ZERO {
            return Err(DeliveryValidationError::NegativeQuantity { item_id: q.item_id });
        }
        if significant_scale(q.quantity) > QUANTITY_SCALE {
            return Err(DeliveryValidationError::QuantityTooPrecise {
                item_id: q.item_id,
                quantity: q.quantity,
            });
        }
        if q.quantity.is_zero() {
            continue;
        }

        let remaining = item.remaining_quantity();
        if q.quantity > remaining {
            return Err(DeliveryValidationError::QuantityExceedsRemaining {
                item_id: q.item_id,
                requested: q.quantity,
                remaining,
            });
        }
        accepted.push(*q);
    }

    if accepted.is_empty() {
        return Err(DeliveryValidationError::NoQuantities);
    }
    Ok(accepted)
}

/// Completing every item with input must go with settling the balance, and vice versa
fn check_settlement(
    snapshot: &OrderSnapshot,
    quantities: &[ItemQuantity],
    amount: Decimal,
    remaining: Decimal,
    policy: &ValidationPolicy,
) -> Result<(), DeliveryValidationError> {
    let items_completed = quantities.iter().all(|q| {
        snapshot
            .item(q.item_id)
            .map(|item| item.remaining_quantity() == q.quantity)
            .unwrap_or(false)
    });
    let amount_settles = within_tolerance(amount, remaining, policy.settlement_tolerance);

    if items_completed != amount_settles {
        return Err(DeliveryValidationError::SettlementInconsistency {
            amount,
            remaining,
            items_completed,
        });
    }
    Ok(())
}

/// Every item's remaining quantity, refused outright if stock cannot cover it
fn full_quantities(snapshot: &OrderSnapshot) -> Result<Vec<ItemQuantity>, DeliveryValidationError> {
    let mut required: HashMap<Uuid, (Decimal, Decimal)> = HashMap::new();
    let mut quantities = Vec::new();

    for state in &snapshot.items {
        let remaining = state.remaining_quantity();
        if remaining <= Decimal::ZERO {
            continue;
        }
        let entry = required
            .entry(state.item.product_id)
            .or_insert((Decimal::ZERO, state.product_stock));
        entry.0 += remaining;
        quantities.push(ItemQuantity {
            item_id: state.item.id,
            quantity: remaining,
        });
    }

    // Deterministic error for orders with several short products
    let mut shortages: Vec<_> = required
        .into_iter()
        .filter(|(_, (needed, available))| available < needed)
        .collect();
    shortages.sort_by_key(|(product_id, _)| *product_id);
    if let Some((product_id, (needed, available))) = shortages.into_iter().next() {
        return Err(DeliveryValidationError::InsufficientStock {
            product_id,
            available,
            required: needed,
        });
    }

    Ok(quantities)
}

// ============================================================================
// General Validations
// ============================================================================

/// Validate order lines: positive quantity, non-negative unit price
pub fn validate_order_items(items: &[CreateOrderItemInput]) -> Result<(), &'static str> {
    if items.is_empty() {
        return Err("An order needs at least one item");
    }
    for item in items {
        if item.quantity <= Decimal::ZERO {
            return Err("Item quantity must be positive");
        }
        if item.unit_price < Decimal::ZERO {
            return Err("Item unit price cannot be negative");
        }
    }
    Ok(())
}

/// Validate product code format (uppercase alphanumeric, '-' and '_', 1-64 chars)
pub fn validate_product_code(code: &str) -> Result<(), &'static str> {
    if code.is_empty() || code.len() > 64 {
        return Err("Product code must be 1-64 characters");
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err("Product code must be uppercase alphanumeric");
    }
    Ok(())
}

/// Validate a client idempotency key (1-128 visible ASCII characters)
pub fn validate_idempotency_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() || key.len() > 128 {
        return Err("Idempotency key must be 1-128 characters");
    }
    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Idempotency key must be visible ASCII");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PurchaseOrder, PurchaseOrderItem};
    use crate::reconciliation::ItemState;
    use chrono::Utc;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn snapshot(total: &str, delivered: &str, items: Vec<ItemState>) -> OrderSnapshot {
        let total = dec(total);
        let delivered = dec(delivered);
        OrderSnapshot {
            order: PurchaseOrder {
                id: Uuid::new_v4(),
                order_number: "PO-2024-001".to_string(),
                partner_name: "Acme Supply".to_string(),
                total_amount: total,
                remaining_amount: total - delivered,
                delivery_deadline: None,
                status: OrderStatus::Partial,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            items,
            delivered_amount: delivered,
            confirmed_deliveries: 1,
        }
    }

    fn item_state(quantity: &str, unit_price: &str, delivered: &str, stock: &str) -> ItemState {
        let quantity = dec(quantity);
        let unit_price = dec(unit_price);
        ItemState {
            item: PurchaseOrderItem {
                id: Uuid::new_v4(),
                order_id: Uuid::nil(),
                product_id: Uuid::new_v4(),
                quantity,
                unit_price,
                total_amount: quantity * unit_price,
            },
            delivered_quantity: dec(delivered),
            product_stock: dec(stock),
        }
    }

    fn request(mode: DeliveryMode, amount: &str, quantities: Vec<ItemQuantity>) -> DeliveryRequest {
        DeliveryRequest {
            amount: dec(amount),
            mode,
            quantities,
            scheduled_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            reason: Some(DeliveryReason::ReadyPartial),
            memo: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn test_amount_beyond_cents_is_rejected() {
        let snap = snapshot("1000", "0", vec![]);
        let req = request(DeliveryMode::AmountOnly, "100.005", vec![]);
        assert_eq!(
            validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err(),
            DeliveryValidationError::AmountTooPrecise { amount: dec("100.005") }
        );
    }

    #[test]
    fn test_sub_cent_amount_is_not_treated_as_positive() {
        let snap = snapshot("1000", "0", vec![]);
        let req = request(DeliveryMode::AmountOnly, "0.004", vec![]);
        let err = validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err();
        assert_eq!(err.code(), "AMOUNT_TOO_PRECISE");
        assert_eq!(err.field(), Some("amount"));
    }

    #[test]
    fn test_trailing_zeros_do_not_count_as_precision() {
        let snap = snapshot("1000", "0", vec![]);
        let req = request(DeliveryMode::AmountOnly, "100.5000", vec![]);
        assert!(validate_delivery(&snap, &req, &ValidationPolicy::default()).is_ok());
    }

    #[test]
    fn test_quantity_beyond_four_places_is_rejected() {
        let state = item_state("10", "100", "0", "50");
        let item_id = state.item.id;
        let snap = snapshot("1000", "0", vec![state]);
        let req = request(
            DeliveryMode::AmountAndQuantity,
            "100",
            vec![ItemQuantity { item_id, quantity: dec("0.00004") }],
        );
        let err = validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err();
        assert_eq!(
            err,
            DeliveryValidationError::QuantityTooPrecise { item_id, quantity: dec("0.00004") }
        );
        assert_eq!(err.field(), Some("quantities"));
    }

    #[test]
    fn test_missing_scheduled_date() {
        let snap = snapshot("10000", "4000", vec![]);
        let mut req = request(DeliveryMode::AmountOnly, "1000", vec![]);
        req.scheduled_date = None;
        assert_eq!(
            validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err(),
            DeliveryValidationError::MissingScheduledDate
        );
    }

    #[test]
    fn test_exceeds_remaining_balance_scenario_b() {
        let snap = snapshot("10000", "4000", vec![]);
        let req = request(DeliveryMode::AmountOnly, "7000", vec![]);
        let err = validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err();
        assert_eq!(
            err,
            DeliveryValidationError::ExceedsRemainingBalance {
                amount: dec("7000"),
                remaining: dec("6000"),
                excess: dec("1000"),
            }
        );
        assert_eq!(err.code(), "AMOUNT_EXCEEDS_REMAINING");
    }

    #[test]
    fn test_non_positive_amount() {
        let snap = snapshot("10000", "0", vec![]);
        let req = request(DeliveryMode::AmountOnly, "0", vec![]);
        assert_eq!(
            validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err(),
            DeliveryValidationError::NonPositiveAmount
        );
    }

    #[test]
    fn test_amount_only_accepts_and_drops_quantities() {
        let items = vec![item_state("10", "1000", "0", "0")];
        let item_id = items[0].item.id;
        let snap = snapshot("10000", "0", items);
        let req = request(
            DeliveryMode::AmountOnly,
            "2500",
            vec![ItemQuantity { item_id, quantity: dec("2") }],
        );
        let ok = validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap();
        assert_eq!(ok.amount, dec("2500"));
        assert!(ok.quantities.is_empty());
        assert!(!ok.settles_order);
    }

    #[test]
    fn test_quantity_mode_requires_positive_quantity() {
        let items = vec![item_state("10", "1000", "0", "0")];
        let item_id = items[0].item.id;
        let snap = snapshot("10000", "0", items);
        let req = request(
            DeliveryMode::AmountAndQuantity,
            "1000",
            vec![ItemQuantity { item_id, quantity: Decimal::ZERO }],
        );
        assert_eq!(
            validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err(),
            DeliveryValidationError::NoQuantities
        );
    }

    #[test]
    fn test_quantity_exceeds_remaining() {
        let items = vec![item_state("5", "1000", "3", "0")];
        let item_id = items[0].item.id;
        let snap = snapshot("5000", "3000", items);
        let req = request(
            DeliveryMode::AmountAndQuantity,
            "1000",
            vec![ItemQuantity { item_id, quantity: dec("3") }],
        );
        assert!(matches!(
            validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err(),
            DeliveryValidationError::QuantityExceedsRemaining { .. }
        ));
    }

    #[test]
    fn test_unknown_item_rejected() {
        let snap = snapshot("5000", "0", vec![item_state("5", "1000", "0", "0")]);
        let req = request(
            DeliveryMode::AmountAndQuantity,
            "1000",
            vec![ItemQuantity { item_id: Uuid::new_v4(), quantity: dec("1") }],
        );
        assert!(matches!(
            validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err(),
            DeliveryValidationError::UnknownItem { .. }
        ));
    }

    #[test]
    fn test_scenario_c_single_item_completes_with_full_amount() {
        // quantity 5, delivered 3; order remaining 2000
        let items = vec![item_state("5", "1000", "3", "0")];
        let item_id = items[0].item.id;
        let snap = snapshot("5000", "3000", items);
        let req = request(
            DeliveryMode::AmountAndQuantity,
            "2000",
            vec![ItemQuantity { item_id, quantity: dec("2") }],
        );
        let ok = validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap();
        assert!(ok.settles_order);
        assert_eq!(ok.quantities.len(), 1);
    }

    #[test]
    fn test_scenario_c_other_item_not_completed_is_rejected() {
        let items = vec![
            item_state("5", "1000", "3", "0"),
            item_state("4", "500", "0", "0"),
        ];
        let first = items[0].item.id;
        let second = items[1].item.id;
        // remaining = 7000 - 3000 = 4000
        let snap = snapshot("7000", "3000", items);
        let req = request(
            DeliveryMode::AmountAndQuantity,
            "4000",
            vec![
                ItemQuantity { item_id: first, quantity: dec("2") },
                ItemQuantity { item_id: second, quantity: dec("1") },
            ],
        );
        let err = validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err();
        assert_eq!(err.code(), "SETTLEMENT_INCONSISTENCY");
    }

    #[test]
    fn test_items_completed_but_partial_amount_rejected() {
        let items = vec![item_state("5", "1000", "3", "0")];
        let item_id = items[0].item.id;
        let snap = snapshot("5000", "3000", items);
        let req = request(
            DeliveryMode::AmountAndQuantity,
            "1000",
            vec![ItemQuantity { item_id, quantity: dec("2") }],
        );
        assert!(matches!(
            validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err(),
            DeliveryValidationError::SettlementInconsistency { items_completed: true, .. }
        ));
    }

    #[test]
    fn test_settlement_tolerance_accepts_near_full_amount() {
        let items = vec![item_state("5", "1000", "3", "0")];
        let item_id = items[0].item.id;
        let snap = snapshot("5000", "3000", items);
        let req = request(
            DeliveryMode::AmountAndQuantity,
            "1997",
            vec![ItemQuantity { item_id, quantity: dec("2") }],
        );
        let ok = validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap();
        assert!(!ok.settles_order);
    }

    #[test]
    fn test_settlement_warn_policy() {
        let items = vec![item_state("5", "1000", "3", "0")];
        let item_id = items[0].item.id;
        let snap = snapshot("5000", "3000", items);
        let req = request(
            DeliveryMode::AmountAndQuantity,
            "1000",
            vec![ItemQuantity { item_id, quantity: dec("2") }],
        );
        let policy = ValidationPolicy {
            settlement_policy: SettlementPolicy::Warn,
            ..ValidationPolicy::default()
        };
        let ok = validate_delivery(&snap, &req, &policy).unwrap();
        assert_eq!(ok.warnings.len(), 1);
    }

    #[test]
    fn test_full_mode_forces_amount_and_quantities() {
        let items = vec![
            item_state("5", "1000", "3", "10"),
            item_state("4", "500", "0", "10"),
        ];
        let snap = snapshot("7000", "3000", items);
        let req = request(DeliveryMode::Full, "1", vec![]);
        let ok = validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap();
        assert_eq!(ok.amount, dec("4000"));
        assert!(ok.settles_order);
        let total_qty: Decimal = ok.quantities.iter().map(|q| q.quantity).sum();
        assert_eq!(total_qty, dec("6"));
    }

    #[test]
    fn test_full_mode_rejects_insufficient_stock() {
        let items = vec![item_state("5", "1000", "0", "4")];
        let snap = snapshot("5000", "0", items);
        let req = request(DeliveryMode::Full, "0", vec![]);
        assert!(matches!(
            validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err(),
            DeliveryValidationError::InsufficientStock { .. }
        ));
    }

    #[test]
    fn test_cancelled_order_rejected() {
        let mut snap = snapshot("5000", "0", vec![]);
        snap.order.status = OrderStatus::Cancelled;
        let req = request(DeliveryMode::AmountOnly, "100", vec![]);
        assert!(matches!(
            validate_delivery(&snap, &req, &ValidationPolicy::default()).unwrap_err(),
            DeliveryValidationError::OrderNotOpen { .. }
        ));
    }

    #[test]
    fn test_product_code_validation() {
        assert!(validate_product_code("SKU-001").is_ok());
        assert!(validate_product_code("").is_err());
        assert!(validate_product_code("sku-001").is_err());
    }

    #[test]
    fn test_idempotency_key_validation() {
        assert!(validate_idempotency_key("3f1c9a2e-submit-1").is_ok());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key("has space").is_err());
    }

    #[test]
    fn test_order_items_validation() {
        let good = CreateOrderItemInput {
            product_id: Uuid::new_v4(),
            quantity: dec("2"),
            unit_price: dec("10"),
        };
        assert!(validate_order_items(&[good.clone()]).is_ok());
        let bad = CreateOrderItemInput { quantity: Decimal::ZERO, ..good };
        assert!(validate_order_items(&[bad]).is_err());
        assert!(validate_order_items(&[]).is_err());
    }
}
