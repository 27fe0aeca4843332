//! Purchase order models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A purchase order placed with a partner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub order_number: String,
    pub partner_name: String,
    /// Fixed at creation
    pub total_amount: Decimal,
    /// Display cache of `total_amount - sum(confirmed deliveries)`.
    /// Re-derive with [`crate::derive_remaining_amount`] before trusting it.
    pub remaining_amount: Decimal,
    pub delivery_deadline: Option<NaiveDate>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Delivery status of a purchase order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Undelivered,
    Partial,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Undelivered => "undelivered",
            OrderStatus::Partial => "partial",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "undelivered" => Some(OrderStatus::Undelivered),
            "partial" => Some(OrderStatus::Partial),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Orders that can still receive deliveries
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Undelivered | OrderStatus::Partial)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status an order should carry given its delivered and remaining amounts.
/// Cancelled orders keep their status.
pub fn derive_order_status(
    current: OrderStatus,
    delivered_amount: Decimal,
    remaining_amount: Decimal,
) -> OrderStatus {
    if current == OrderStatus::Cancelled {
        OrderStatus::Cancelled
    } else if delivered_amount <= Decimal::ZERO {
        OrderStatus::Undelivered
    } else if remaining_amount <= Decimal::ZERO {
        OrderStatus::Completed
    } else {
        OrderStatus::Partial
    }
}

/// A line item of a purchase order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// quantity × unit_price
    pub total_amount: Decimal,
}

impl PurchaseOrderItem {
    pub fn line_total(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

/// Input for creating a purchase order together with its items
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderInput {
    #[validate(length(min = 1, max = 64, message = "Order number is required"))]
    pub order_number: String,
    #[validate(length(min = 1, max = 200, message = "Partner name is required"))]
    pub partner_name: String,
    pub delivery_deadline: Option<NaiveDate>,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<CreateOrderItemInput>,
}

/// Line item for order creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderItemInput {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

/// Order with its items and balances re-derived from the ledger
#[derive(Debug, Clone, Serialize)]
pub struct OrderBalanceView {
    #[serde(flatten)]
    pub order: PurchaseOrder,
    pub delivered_amount: Decimal,
    /// Derived, not the cached column
    pub derived_remaining_amount: Decimal,
    pub cache_in_sync: bool,
    pub delivery_count: i64,
    pub items: Vec<ItemBalanceView>,
}

/// Per-item delivered and remaining quantity
#[derive(Debug, Clone, Serialize)]
pub struct ItemBalanceView {
    #[serde(flatten)]
    pub item: PurchaseOrderItem,
    pub delivered_quantity: Decimal,
    pub remaining_quantity: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            OrderStatus::Undelivered,
            OrderStatus::Partial,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::from_str("shipped"), None);
    }

    #[test]
    fn test_derive_order_status() {
        let d = Decimal::from;
        assert_eq!(
            derive_order_status(OrderStatus::Undelivered, d(0), d(10_000)),
            OrderStatus::Undelivered
        );
        assert_eq!(
            derive_order_status(OrderStatus::Undelivered, d(4_000), d(6_000)),
            OrderStatus::Partial
        );
        assert_eq!(
            derive_order_status(OrderStatus::Partial, d(10_000), d(0)),
            OrderStatus::Completed
        );
        assert_eq!(
            derive_order_status(OrderStatus::Cancelled, d(4_000), d(6_000)),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn test_create_order_input_requires_items() {
        let input = CreateOrderInput {
            order_number: "PO-2024-001".to_string(),
            partner_name: "Acme Supply".to_string(),
            delivery_deadline: None,
            items: vec![],
        };
        assert!(input.validate().is_err());
    }
}
