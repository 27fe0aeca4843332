//! Inventory and accounting allocation models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A stocked product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub unit_price: Decimal,
    /// Display cache of `sum(in) - sum(out)`; see [`crate::derive_stock`]
    pub current_stock: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a product
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 64, message = "Product code is required"))]
    pub code: String,
    #[validate(length(min = 1, max = 200, message = "Product name is required"))]
    pub name: String,
    pub unit_price: Decimal,
}

/// Direction of a stock movement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    In,
    Out,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in" => Some(MovementType::In),
            "out" => Some(MovementType::Out),
            _ => None,
        }
    }

    /// Signed effect of `quantity` on stock
    pub fn signed(&self, quantity: Decimal) -> Decimal {
        match self {
            MovementType::In => quantity,
            MovementType::Out => -quantity,
        }
    }
}

/// A physical stock change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    /// Real unit cost of the product, not a pro-rated delivery price
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub delivery_id: Option<Uuid>,
    pub order_item_id: Option<Uuid>,
    pub delivery_sequence: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// How an allocation amount was determined
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    Ratio,
    Manual,
}

impl AllocationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMethod::Ratio => "ratio",
            AllocationMethod::Manual => "manual",
        }
    }
}

/// Bookkeeping share of a delivery's amount assigned to one order line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingAllocation {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub product_id: Uuid,
    pub order_item_id: Uuid,
    pub allocated_amount: Decimal,
    pub allocation_ratio: Decimal,
    pub method: AllocationMethod,
    pub created_at: DateTime<Utc>,
}
