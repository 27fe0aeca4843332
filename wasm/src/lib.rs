//! WebAssembly module for the Purchase Ledger
//!
//! Provides client-side previews for delivery forms:
//! - Delivery validation against an order snapshot
//! - Remaining balance derivation
//! - Allocation planning
//! - Memo composition and duplicate detection
//!
//! The server re-runs every check under the order lock; these results are advisory.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::reconciliation::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    web_sys::console::log_1(&JsValue::from_str("purchase ledger wasm ready"));
}

/// Outcome of a validation preview, serialized for the form
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum PreviewOutcome {
    Accepted {
        delivery: NormalizedDelivery,
    },
    Rejected {
        code: &'static str,
        field: Option<&'static str>,
        message: String,
    },
}

fn parse_decimal(value: &str, what: &str) -> Result<Decimal, String> {
    Decimal::from_str(value.trim()).map_err(|e| format!("Invalid {}: {}", what, e))
}

fn parse_json<T: serde::de::DeserializeOwned>(json: &str, what: &str) -> Result<T, String> {
    serde_json::from_str(json).map_err(|e| format!("Invalid {} JSON: {}", what, e))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| e.to_string())
}

fn preview_delivery(snapshot_json: &str, request_json: &str, policy_json: Option<String>) -> Result<String, String> {
    let snapshot: OrderSnapshot = parse_json(snapshot_json, "snapshot")?;
    let request: DeliveryRequest = parse_json(request_json, "request")?;
    let policy = match policy_json {
        Some(json) => parse_json(&json, "policy")?,
        None => ValidationPolicy::default(),
    };

    let outcome = match validate_delivery(&snapshot, &request, &policy) {
        Ok(delivery) => PreviewOutcome::Accepted { delivery },
        Err(e) => PreviewOutcome::Rejected {
            code: e.code(),
            field: e.field(),
            message: e.to_string(),
        },
    };
    to_json(&outcome)
}

fn remaining_amount(total: &str, confirmed_json: &str) -> Result<String, String> {
    let total = parse_decimal(total, "total")?;
    let confirmed: Vec<Decimal> = parse_json(confirmed_json, "amounts")?;
    Ok(derive_remaining_amount(total, confirmed).to_string())
}

fn allocation_plan(
    order_total: &str,
    items_json: &str,
    amount: &str,
    mode: &str,
    quantities_json: &str,
) -> Result<String, String> {
    let order_total = parse_decimal(order_total, "order total")?;
    let items: Vec<PurchaseOrderItem> = parse_json(items_json, "items")?;
    let amount = parse_decimal(amount, "amount")?;
    let mode = DeliveryMode::from_str(mode).ok_or_else(|| format!("Unknown delivery mode: {}", mode))?;
    let quantities: Vec<ItemQuantity> = parse_json(quantities_json, "quantities")?;

    to_json(&plan_allocation(order_total, &items, amount, mode, &quantities))
}

fn memo(order_number: &str, sequence: i32, mode: &str, reason: Option<String>, text: Option<String>) -> Result<String, String> {
    let mode = DeliveryMode::from_str(mode).ok_or_else(|| format!("Unknown delivery mode: {}", mode))?;
    let reason = match reason.as_deref() {
        Some(r) => Some(DeliveryReason::from_str(r).ok_or_else(|| format!("Unknown reason: {}", r))?),
        None => None,
    };
    Ok(compose_memo(order_number, sequence, mode, reason, text.as_deref()))
}

fn duplicate_sequence(recent_json: &str, amount: &str, now_ms: i64) -> Result<Option<i32>, String> {
    let recent: Vec<RecentDelivery> = parse_json(recent_json, "recent deliveries")?;
    let amount = parse_decimal(amount, "amount")?;
    let now: DateTime<Utc> =
        DateTime::from_timestamp_millis(now_ms).ok_or_else(|| "Invalid timestamp".to_string())?;

    Ok(find_duplicate(&recent, amount, now, &DuplicatePolicy::default()).map(|d| d.delivery_sequence))
}

/// Validate a delivery form against an order snapshot.
///
/// Returns `{"status": "accepted", "delivery": {...}}` or
/// `{"status": "rejected", "code", "field", "message"}`.
#[wasm_bindgen]
pub fn validate_delivery_preview(
    snapshot_json: &str,
    request_json: &str,
    policy_json: Option<String>,
) -> Result<String, JsValue> {
    preview_delivery(snapshot_json, request_json, policy_json).map_err(|e| JsValue::from_str(&e))
}

/// Remaining balance from the order total and confirmed delivery amounts
#[wasm_bindgen]
pub fn derive_remaining(total: &str, confirmed_amounts_json: &str) -> Result<String, JsValue> {
    remaining_amount(total, confirmed_amounts_json).map_err(|e| JsValue::from_str(&e))
}

/// Movements and allocations a delivery would produce
#[wasm_bindgen]
pub fn preview_allocation(
    order_total: &str,
    items_json: &str,
    amount: &str,
    mode: &str,
    quantities_json: &str,
) -> Result<String, JsValue> {
    allocation_plan(order_total, items_json, amount, mode, quantities_json)
        .map_err(|e| JsValue::from_str(&e))
}

#[wasm_bindgen]
pub fn compose_delivery_memo(
    order_number: &str,
    sequence: i32,
    mode: &str,
    reason: Option<String>,
    memo_text: Option<String>,
) -> Result<String, JsValue> {
    memo(order_number, sequence, mode, reason, memo_text).map_err(|e| JsValue::from_str(&e))
}

/// Sequence of a recent delivery the amount would duplicate, if any
#[wasm_bindgen]
pub fn check_duplicate(recent_json: &str, amount: &str) -> Result<Option<i32>, JsValue> {
    duplicate_sequence(recent_json, amount, js_sys::Date::now() as i64)
        .map_err(|e| JsValue::from_str(&e))
}

#[wasm_bindgen]
pub fn is_valid_idempotency_key(key: &str) -> bool {
    validate_idempotency_key(key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const ITEM_ID: &str = "6a1f1c7e-3a44-4d7b-9a51-2f0e8d1b7c10";
    const PRODUCT_ID: &str = "0d3c52a4-11b8-4e8e-8f7e-5c0a4b3e9d21";
    const ORDER_ID: &str = "9b2d6f3e-7c1a-4b58-a0e4-1e2f3a4b5c6d";

    fn snapshot_json() -> String {
        json!({
            "order": {
                "id": ORDER_ID,
                "order_number": "PO-2024-0042",
                "partner_name": "Northwind Traders",
                "total_amount": "10000",
                "remaining_amount": "6000",
                "delivery_deadline": null,
                "status": "partial",
                "created_at": "2024-06-01T08:00:00Z",
                "updated_at": "2024-06-02T08:00:00Z"
            },
            "items": [{
                "item": {
                    "id": ITEM_ID,
                    "order_id": ORDER_ID,
                    "product_id": PRODUCT_ID,
                    "quantity": "10",
                    "unit_price": "1000",
                    "total_amount": "10000"
                },
                "delivered_quantity": "4",
                "product_stock": "50"
            }],
            "delivered_amount": "4000",
            "confirmed_deliveries": 1
        })
        .to_string()
    }

    #[test]
    fn test_preview_rejects_excess_amount() {
        let request = json!({
            "amount": "7000",
            "mode": "amount_only",
            "scheduled_date": "2024-06-15"
        });
        let out: Value =
            serde_json::from_str(&preview_delivery(&snapshot_json(), &request.to_string(), None).unwrap()).unwrap();

        assert_eq!(out["status"], "rejected");
        assert_eq!(out["code"], "AMOUNT_EXCEEDS_REMAINING");
        assert_eq!(out["field"], "amount");
    }

    #[test]
    fn test_preview_accepts_partial_quantity() {
        let request = json!({
            "amount": "2000",
            "mode": "amount_and_quantity",
            "quantities": [{ "item_id": ITEM_ID, "quantity": "2" }],
            "scheduled_date": "2024-06-15"
        });
        let out: Value =
            serde_json::from_str(&preview_delivery(&snapshot_json(), &request.to_string(), None).unwrap()).unwrap();

        assert_eq!(out["status"], "accepted");
        assert_eq!(out["delivery"]["settles_order"], false);
    }

    #[test]
    fn test_preview_reports_bad_json() {
        let err = preview_delivery("{", "{}", None).unwrap_err();
        assert!(err.starts_with("Invalid snapshot JSON"));
    }

    #[test]
    fn test_remaining_amount() {
        assert_eq!(remaining_amount("10000", r#"["4000", "1500.50"]"#).unwrap(), "4499.50");
        assert!(remaining_amount("abc", "[]").is_err());
    }

    #[test]
    fn test_allocation_plan_preview() {
        let items = json!([{
            "id": ITEM_ID,
            "order_id": ORDER_ID,
            "product_id": PRODUCT_ID,
            "quantity": "10",
            "unit_price": "1000",
            "total_amount": "10000"
        }]);
        let quantities = json!([{ "item_id": ITEM_ID, "quantity": "3" }]);
        let plan: Value = serde_json::from_str(
            &allocation_plan("10000", &items.to_string(), "3000", "amount_and_quantity", &quantities.to_string())
                .unwrap(),
        )
        .unwrap();

        assert_eq!(plan["movements"].as_array().map(Vec::len), Some(1));
        assert_eq!(plan["allocations"].as_array().map(Vec::len), Some(1));
        assert!(allocation_plan("1", "[]", "1", "bogus", "[]").is_err());
    }

    #[test]
    fn test_memo() {
        let text = memo("PO-7", 3, "full", None, Some("last batch".to_string())).unwrap();
        assert_eq!(text, "PO-7 delivery #3 [full delivery] - last batch");
        assert!(memo("PO-7", 3, "full", Some("nope".to_string()), None).is_err());
    }

    #[test]
    fn test_duplicate_detection() {
        let now_ms = 1_718_000_000_000i64;
        let created = DateTime::from_timestamp_millis(now_ms - 4_000).unwrap();
        let recent = json!([{
            "id": ORDER_ID,
            "delivery_sequence": 2,
            "amount": "2500",
            "created_at": created
        }]);

        assert_eq!(duplicate_sequence(&recent.to_string(), "2500", now_ms).unwrap(), Some(2));
        assert_eq!(duplicate_sequence(&recent.to_string(), "9000", now_ms).unwrap(), None);
    }

    #[test]
    fn test_idempotency_key() {
        assert!(is_valid_idempotency_key("submit-7f3a"));
        assert!(!is_valid_idempotency_key(""));
        assert!(!is_valid_idempotency_key("has space"));
    }
}
