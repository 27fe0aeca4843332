//! Delivery (installment) models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a delivery affects physical stock
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Money only; stock is untouched
    AmountOnly,
    /// Money plus caller-supplied per-item quantities
    AmountAndQuantity,
    /// Everything still outstanding on the order
    Full,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::AmountOnly => "amount_only",
            DeliveryMode::AmountAndQuantity => "amount_and_quantity",
            DeliveryMode::Full => "full",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "amount_only" => Some(DeliveryMode::AmountOnly),
            "amount_and_quantity" => Some(DeliveryMode::AmountAndQuantity),
            "full" => Some(DeliveryMode::Full),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryMode::AmountOnly => "amount only",
            DeliveryMode::AmountAndQuantity => "amount and quantity",
            DeliveryMode::Full => "full delivery",
        }
    }

    /// Whether the mode produces inventory movements
    pub fn moves_stock(&self) -> bool {
        !matches!(self, DeliveryMode::AmountOnly)
    }
}

/// Reason recorded for a partial delivery
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryReason {
    ReadyPartial,
    InventoryLimited,
    CustomerRequest,
    QualityCheck,
    ProductionDelay,
    ShippingArrangement,
    CashFlow,
    Other,
}

impl DeliveryReason {
    pub const ALL: [DeliveryReason; 8] = [
        DeliveryReason::ReadyPartial,
        DeliveryReason::InventoryLimited,
        DeliveryReason::CustomerRequest,
        DeliveryReason::QualityCheck,
        DeliveryReason::ProductionDelay,
        DeliveryReason::ShippingArrangement,
        DeliveryReason::CashFlow,
        DeliveryReason::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryReason::ReadyPartial => "ready_partial",
            DeliveryReason::InventoryLimited => "inventory_limited",
            DeliveryReason::CustomerRequest => "customer_request",
            DeliveryReason::QualityCheck => "quality_check",
            DeliveryReason::ProductionDelay => "production_delay",
            DeliveryReason::ShippingArrangement => "shipping_arrangement",
            DeliveryReason::CashFlow => "cash_flow",
            DeliveryReason::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryReason::ReadyPartial => "Partial quantity ready",
            DeliveryReason::InventoryLimited => "Limited inventory",
            DeliveryReason::CustomerRequest => "Customer request",
            DeliveryReason::QualityCheck => "Pending quality check",
            DeliveryReason::ProductionDelay => "Production delay",
            DeliveryReason::ShippingArrangement => "Shipping arrangement",
            DeliveryReason::CashFlow => "Cash flow",
            DeliveryReason::Other => "Other",
        }
    }
}

/// Ledger status of a delivery. Only confirmed deliveries count toward balances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Confirmed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Confirmed => "confirmed",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(DeliveryStatus::Confirmed),
            "cancelled" => Some(DeliveryStatus::Cancelled),
            _ => None,
        }
    }
}

/// Where a delivery stands in the submission pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Validated,
    /// Ledger row committed, stock and allocations not yet written
    Recorded,
    Allocated,
}

/// Requested quantity for one order line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemQuantity {
    pub item_id: Uuid,
    pub quantity: Decimal,
}

/// A delivery submission as sent by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    /// Ignored in full mode, where the remaining balance is used
    #[serde(default)]
    pub amount: Decimal,
    pub mode: DeliveryMode,
    #[serde(default)]
    pub quantities: Vec<ItemQuantity>,
    pub scheduled_date: Option<NaiveDate>,
    pub reason: Option<DeliveryReason>,
    pub memo: Option<String>,
    /// Client-generated key, unique per submission attempt
    pub idempotency_key: Option<String>,
}

/// An immutable delivery ledger record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub total_amount: Decimal,
    pub delivery_sequence: i32,
    pub transaction_date: NaiveDate,
    pub status: DeliveryStatus,
    pub mode: DeliveryMode,
    pub reason: Option<DeliveryReason>,
    pub memo: String,
    pub requested_quantities: Vec<ItemQuantity>,
    pub idempotency_key: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    pub fn pipeline_state(&self) -> PipelineState {
        if self.allocated_at.is_some() {
            PipelineState::Allocated
        } else {
            PipelineState::Recorded
        }
    }

    pub fn counts_toward_balance(&self) -> bool {
        self.status == DeliveryStatus::Confirmed
    }
}

/// Result of a delivery submission or an allocation retry
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub delivery: Delivery,
    pub state: PipelineState,
    pub movements_created: usize,
    pub allocations_created: usize,
    /// True when an earlier submission with the same idempotency key was returned
    pub replayed: bool,
    pub remaining_amount: Decimal,
    pub warnings: Vec<String>,
}

/// Build the memo stored on a delivery record.
///
/// Format: `"{order} delivery #{seq} [{mode}] reason: {reason} - {text}"`, with the reason
/// and free-text parts omitted when absent.
pub fn compose_memo(
    order_number: &str,
    sequence: i32,
    mode: DeliveryMode,
    reason: Option<DeliveryReason>,
    memo: Option<&str>,
) -> String {
    let mut out = format!("{} delivery #{} [{}]", order_number, sequence, mode.label());
    if let Some(reason) = reason {
        out.push_str(" reason: ");
        out.push_str(reason.label());
    }
    if let Some(text) = memo.map(str::trim).filter(|t| !t.is_empty()) {
        out.push_str(" - ");
        out.push_str(text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_parse() {
        assert_eq!(DeliveryReason::ALL.len(), 8);
        for reason in DeliveryReason::ALL {
            assert_eq!(DeliveryReason::from_str(reason.as_str()), Some(reason));
        }
        assert_eq!(DeliveryReason::from_str("weather"), None);
    }

    #[test]
    fn test_compose_memo_full() {
        let memo = compose_memo(
            "PO-2024-017",
            2,
            DeliveryMode::AmountAndQuantity,
            Some(DeliveryReason::ProductionDelay),
            Some("  second truck  "),
        );
        assert_eq!(
            memo,
            "PO-2024-017 delivery #2 [amount and quantity] reason: Production delay - second truck"
        );
    }

    #[test]
    fn test_compose_memo_skips_blank_text() {
        let memo = compose_memo("PO-1", 1, DeliveryMode::Full, None, Some("   "));
        assert_eq!(memo, "PO-1 delivery #1 [full delivery]");
    }

    #[test]
    fn test_mode_moves_stock() {
        assert!(!DeliveryMode::AmountOnly.moves_stock());
        assert!(DeliveryMode::AmountAndQuantity.moves_stock());
        assert!(DeliveryMode::Full.moves_stock());
    }
}
