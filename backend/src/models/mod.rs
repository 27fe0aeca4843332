//! Database models for the purchase ledger
//!
//! Re-exports models from the shared crate and adds the row types the store decodes into.
//! Enum columns are stored as text guarded by CHECK constraints.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

pub use shared::models::*;

/// Column list matching [`ProductRow`]
pub const PRODUCT_COLUMNS: &str = "id, code, name, unit_price, current_stock, created_at";

/// Column list matching [`OrderRow`]
pub const ORDER_COLUMNS: &str = "id, order_number, partner_name, total_amount, remaining_amount, \
     delivery_deadline, status, created_at, updated_at";

/// Column list matching [`OrderItemRow`]
pub const ORDER_ITEM_COLUMNS: &str = "id, order_id, product_id, quantity, unit_price, total_amount";

/// Column list matching [`DeliveryRow`]
pub const DELIVERY_COLUMNS: &str = "id, order_id, total_amount, delivery_sequence, transaction_date, \
     status, mode, reason, memo, requested_quantities, idempotency_key, allocated_at, created_at";

#[derive(Debug, FromRow)]
pub struct ProductRow {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub unit_price: Decimal,
    pub current_stock: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            code: row.code,
            name: row.name,
            unit_price: row.unit_price,
            current_stock: row.current_stock,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub order_number: String,
    pub partner_name: String,
    pub total_amount: Decimal,
    pub remaining_amount: Decimal,
    pub delivery_deadline: Option<NaiveDate>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderRow> for PurchaseOrder {
    fn from(row: OrderRow) -> Self {
        PurchaseOrder {
            id: row.id,
            order_number: row.order_number,
            partner_name: row.partner_name,
            total_amount: row.total_amount,
            remaining_amount: row.remaining_amount,
            delivery_deadline: row.delivery_deadline,
            status: order_status_from_str(&row.status),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct OrderItemRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
}

impl From<OrderItemRow> for PurchaseOrderItem {
    fn from(row: OrderItemRow) -> Self {
        PurchaseOrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            total_amount: row.total_amount,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct DeliveryRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub total_amount: Decimal,
    pub delivery_sequence: i32,
    pub transaction_date: NaiveDate,
    pub status: String,
    pub mode: String,
    pub reason: Option<String>,
    pub memo: String,
    pub requested_quantities: Json<Vec<ItemQuantity>>,
    pub idempotency_key: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DeliveryRow> for Delivery {
    fn from(row: DeliveryRow) -> Self {
        Delivery {
            id: row.id,
            order_id: row.order_id,
            total_amount: row.total_amount,
            delivery_sequence: row.delivery_sequence,
            transaction_date: row.transaction_date,
            status: DeliveryStatus::from_str(&row.status).unwrap_or(DeliveryStatus::Confirmed),
            mode: DeliveryMode::from_str(&row.mode).unwrap_or(DeliveryMode::AmountOnly),
            reason: row.reason.as_deref().and_then(DeliveryReason::from_str),
            memo: row.memo,
            requested_quantities: row.requested_quantities.0,
            idempotency_key: row.idempotency_key,
            allocated_at: row.allocated_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct MovementRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub movement_type: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub delivery_id: Option<Uuid>,
    pub order_item_id: Option<Uuid>,
    pub delivery_sequence: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<MovementRow> for InventoryMovement {
    fn from(row: MovementRow) -> Self {
        InventoryMovement {
            id: row.id,
            product_id: row.product_id,
            movement_type: MovementType::from_str(&row.movement_type).unwrap_or(MovementType::In),
            quantity: row.quantity,
            unit_price: row.unit_price,
            total_amount: row.total_amount,
            delivery_id: row.delivery_id,
            order_item_id: row.order_item_id,
            delivery_sequence: row.delivery_sequence,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct AllocationRow {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub product_id: Uuid,
    pub order_item_id: Uuid,
    pub allocated_amount: Decimal,
    pub allocation_ratio: Decimal,
    pub method: String,
    pub created_at: DateTime<Utc>,
}

impl From<AllocationRow> for AccountingAllocation {
    fn from(row: AllocationRow) -> Self {
        AccountingAllocation {
            id: row.id,
            delivery_id: row.delivery_id,
            product_id: row.product_id,
            order_item_id: row.order_item_id,
            allocated_amount: row.allocated_amount,
            allocation_ratio: row.allocation_ratio,
            method: if row.method == AllocationMethod::Manual.as_str() {
                AllocationMethod::Manual
            } else {
                AllocationMethod::Ratio
            },
            created_at: row.created_at,
        }
    }
}

/// Status text from the store; the CHECK constraint keeps it within the known set
pub fn order_status_from_str(status: &str) -> OrderStatus {
    OrderStatus::from_str(status).unwrap_or(OrderStatus::Undelivered)
}
