//! Correction planning: which derived fields differ from the ledger and what they should be.
//!
//! Plans only contain rows whose stored value differs from the derivation, so applying a
//! plan and planning again yields an empty plan.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::integrity::{OrderBalanceRow, ProductStockRow};
use crate::models::{derive_order_status, OrderStatus};

/// New order total from the sum of its items
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTotalFix {
    pub order_id: Uuid,
    pub stored_total: Decimal,
    pub derived_total: Decimal,
}

/// New remaining-amount cache and status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemainingFix {
    pub order_id: Uuid,
    pub stored_remaining: Decimal,
    pub derived_remaining: Decimal,
    pub stored_status: OrderStatus,
    pub derived_status: OrderStatus,
}

/// New stock cache from the movement log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockFix {
    pub product_id: Uuid,
    pub code: String,
    pub stored_stock: Decimal,
    pub derived_stock: Decimal,
}

pub fn plan_order_total_fixes(rows: &[OrderBalanceRow]) -> Vec<OrderTotalFix> {
    rows.iter()
        .filter(|r| r.items_total != r.total_amount)
        .map(|r| OrderTotalFix {
            order_id: r.order_id,
            stored_total: r.total_amount,
            derived_total: r.items_total,
        })
        .collect()
}

pub fn plan_remaining_fixes(rows: &[OrderBalanceRow]) -> Vec<RemainingFix> {
    rows.iter()
        .filter_map(|r| {
            let derived_remaining = r.derived_remaining();
            let derived_status = derive_order_status(r.status, r.delivered_total, derived_remaining);
            (derived_remaining != r.remaining_cached || derived_status != r.status).then(|| {
                RemainingFix {
                    order_id: r.order_id,
                    stored_remaining: r.remaining_cached,
                    derived_remaining,
                    stored_status: r.status,
                    derived_status,
                }
            })
        })
        .collect()
}

pub fn plan_stock_fixes(rows: &[ProductStockRow]) -> Vec<StockFix> {
    rows.iter()
        .filter(|r| r.current_stock != r.derived_stock())
        .map(|r| StockFix {
            product_id: r.product_id,
            code: r.code.clone(),
            stored_stock: r.current_stock,
            derived_stock: r.derived_stock(),
        })
        .collect()
}
