//! Pure evaluators for the integrity audit.
//!
//! The backend runs one aggregate query per check and hands the rows to the evaluators
//! here, which decide severities, cap samples and phrase the findings.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::models::{CheckCategory, IntegrityCheckResult, OrderStatus, Severity};
use crate::reconciliation::{analyze_sequences, derive_remaining_amount};

/// Tunables for evaluators
#[derive(Debug, Clone)]
pub struct IntegrityLimits {
    pub sample_limit: usize,
    /// Stock difference tolerated before a mismatch is reported
    pub stock_tolerance: Decimal,
    /// Age after which an unallocated delivery is reported as stuck
    pub in_progress_grace: Duration,
}

impl Default for IntegrityLimits {
    fn default() -> Self {
        Self {
            sample_limit: 10,
            stock_tolerance: Decimal::new(1, 3),
            in_progress_grace: Duration::seconds(300),
        }
    }
}

/// Per-order aggregates: stored columns next to their ledger derivations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBalanceRow {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub items_total: Decimal,
    pub delivered_total: Decimal,
    pub remaining_cached: Decimal,
}

impl OrderBalanceRow {
    pub fn derived_remaining(&self) -> Decimal {
        derive_remaining_amount(self.total_amount, [self.delivered_total])
    }
}

/// Per-product stock cache next to movement totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductStockRow {
    pub product_id: Uuid,
    pub code: String,
    pub current_stock: Decimal,
    pub total_in: Decimal,
    pub total_out: Decimal,
}

impl ProductStockRow {
    pub fn derived_stock(&self) -> Decimal {
        self.total_in - self.total_out
    }

    pub fn mismatch(&self) -> Decimal {
        self.derived_stock() - self.current_stock
    }
}

/// Confirmed delivery sequence numbers of one order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRow {
    pub order_id: Uuid,
    pub order_number: String,
    pub sequences: Vec<i32>,
}

/// Confirmed delivery whose allocation has not been written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnallocatedDeliveryRow {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub delivery_sequence: i32,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Orphan count for one foreign-key relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceCount {
    /// e.g. `purchase_order_items.order_id -> purchase_orders`
    pub relation: String,
    pub orphan_count: u64,
    pub sample_ids: Vec<Uuid>,
}

/// Count and samples of rows breaking one fixed rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleViolation {
    pub check: String,
    pub title: String,
    pub count: u64,
    pub samples: Vec<serde_json::Value>,
    pub suggested_action: String,
    pub derivation: String,
}

fn capped<T, F>(rows: &[&T], limit: usize, f: F) -> Vec<serde_json::Value>
where
    F: Fn(&T) -> serde_json::Value,
{
    rows.iter().take(limit).map(|r| f(*r)).collect()
}

// ============================================================================
// Financial
// ============================================================================

const ITEM_SUM_DERIVATION: &str =
    "SUM(purchase_order_items.total_amount) GROUP BY order_id vs purchase_orders.total_amount";
const REMAINING_DERIVATION: &str =
    "purchase_orders.total_amount - SUM(confirmed deliveries.total_amount) vs purchase_orders.remaining_amount";

pub fn check_financial(rows: &[OrderBalanceRow], limits: &IntegrityLimits) -> Vec<IntegrityCheckResult> {
    let mut results = Vec::new();

    let item_mismatch: Vec<&OrderBalanceRow> =
        rows.iter().filter(|r| r.items_total != r.total_amount).collect();
    if item_mismatch.is_empty() {
        results.push(IntegrityCheckResult::success(
            CheckCategory::Financial,
            "order_item_total_mismatch",
            "Order totals match their items",
            ITEM_SUM_DERIVATION,
        ));
    } else {
        results.push(
            IntegrityCheckResult::finding(
                CheckCategory::Financial,
                "order_item_total_mismatch",
                Severity::Critical,
                "Order totals differ from the sum of their items",
                format!("{} order(s) have a total that does not equal the sum of their line items", item_mismatch.len()),
                item_mismatch.len() as u64,
            )
            .with_samples(capped(&item_mismatch, limits.sample_limit, |r| {
                json!({
                    "order_id": r.order_id,
                    "order_number": r.order_number,
                    "total_amount": r.total_amount,
                    "items_total": r.items_total,
                    "difference": r.items_total - r.total_amount,
                })
            }))
            .with_actions(&["Run the financial correction to recompute order totals from items"])
            .with_derivation(ITEM_SUM_DERIVATION),
        );
    }

    let over_delivered: Vec<&OrderBalanceRow> = rows
        .iter()
        .filter(|r| r.derived_remaining() < Decimal::ZERO)
        .collect();
    if !over_delivered.is_empty() {
        results.push(
            IntegrityCheckResult::finding(
                CheckCategory::Financial,
                "over_delivered_order",
                Severity::Critical,
                "Confirmed deliveries exceed the order total",
                format!("{} order(s) have a negative remaining balance", over_delivered.len()),
                over_delivered.len() as u64,
            )
            .with_samples(capped(&over_delivered, limits.sample_limit, |r| {
                json!({
                    "order_id": r.order_id,
                    "order_number": r.order_number,
                    "total_amount": r.total_amount,
                    "delivered_total": r.delivered_total,
                })
            }))
            .with_actions(&["Review the order's deliveries and record a compensating entry"])
            .with_derivation(REMAINING_DERIVATION),
        );
    }

    let stale_cache: Vec<&OrderBalanceRow> = rows
        .iter()
        .filter(|r| r.remaining_cached != r.derived_remaining())
        .collect();
    if !stale_cache.is_empty() {
        results.push(
            IntegrityCheckResult::finding(
                CheckCategory::Financial,
                "remaining_amount_cache_drift",
                Severity::Warning,
                "Stored remaining balance differs from confirmed deliveries",
                format!("{} order(s) carry a stale remaining_amount", stale_cache.len()),
                stale_cache.len() as u64,
            )
            .with_samples(capped(&stale_cache, limits.sample_limit, |r| {
                json!({
                    "order_id": r.order_id,
                    "order_number": r.order_number,
                    "remaining_cached": r.remaining_cached,
                    "remaining_derived": r.derived_remaining(),
                })
            }))
            .with_actions(&["Run the delivery correction to refresh remaining balances"])
            .with_derivation(REMAINING_DERIVATION),
        );
    }

    results
}

// ============================================================================
// Inventory
// ============================================================================

const STOCK_DERIVATION: &str =
    "SUM(quantity) FILTER (movement_type = 'in') - SUM(quantity) FILTER (movement_type = 'out') vs products.current_stock";

pub fn check_inventory(rows: &[ProductStockRow], limits: &IntegrityLimits) -> Vec<IntegrityCheckResult> {
    let mismatched: Vec<&ProductStockRow> = rows
        .iter()
        .filter(|r| r.mismatch().abs() > limits.stock_tolerance)
        .collect();

    if mismatched.is_empty() {
        return vec![IntegrityCheckResult::success(
            CheckCategory::Inventory,
            "stock_mismatch",
            "Product stock matches the movement log",
            STOCK_DERIVATION,
        )];
    }

    let total_units: Decimal = mismatched.iter().map(|r| r.mismatch().abs()).sum();
    vec![IntegrityCheckResult::finding(
        CheckCategory::Inventory,
        "stock_mismatch",
        Severity::Warning,
        "Product stock differs from the movement log",
        format!(
            "{} product(s) out of sync, {} unit(s) in total",
            mismatched.len(),
            total_units.normalize()
        ),
        mismatched.len() as u64,
    )
    .with_samples(capped(&mismatched, limits.sample_limit, |r| {
        json!({
            "product_id": r.product_id,
            "code": r.code,
            "current_stock": r.current_stock,
            "derived_stock": r.derived_stock(),
            "mismatch": r.mismatch(),
        })
    }))
    .with_actions(&["Run the inventory correction to recompute stock from movements"])
    .with_derivation(STOCK_DERIVATION)]
}

// ============================================================================
// Delivery
// ============================================================================

pub fn check_delivery(
    balances: &[OrderBalanceRow],
    sequences: &[SequenceRow],
    unallocated: &[UnallocatedDeliveryRow],
    now: DateTime<Utc>,
    limits: &IntegrityLimits,
) -> Vec<IntegrityCheckResult> {
    let mut results = Vec::new();

    let drifted: Vec<&OrderBalanceRow> = balances
        .iter()
        .filter(|r| r.remaining_cached != r.derived_remaining())
        .collect();
    if drifted.is_empty() {
        results.push(IntegrityCheckResult::success(
            CheckCategory::Delivery,
            "remaining_balance_mismatch",
            "Remaining balances match confirmed deliveries",
            REMAINING_DERIVATION,
        ));
    } else {
        results.push(
            IntegrityCheckResult::finding(
                CheckCategory::Delivery,
                "remaining_balance_mismatch",
                Severity::Critical,
                "Remaining balance does not match confirmed deliveries",
                format!("{} order(s) disagree with their delivery ledger", drifted.len()),
                drifted.len() as u64,
            )
            .with_samples(capped(&drifted, limits.sample_limit, |r| {
                json!({
                    "order_id": r.order_id,
                    "order_number": r.order_number,
                    "remaining_cached": r.remaining_cached,
                    "remaining_derived": r.derived_remaining(),
                    "delivered_total": r.delivered_total,
                })
            }))
            .with_actions(&["Run the delivery correction to refresh remaining balances"])
            .with_derivation(REMAINING_DERIVATION),
        );
    }

    let broken: Vec<(&SequenceRow, crate::reconciliation::SequenceReport)> = sequences
        .iter()
        .map(|row| (row, analyze_sequences(&row.sequences)))
        .filter(|(_, report)| !report.is_contiguous())
        .collect();
    if !broken.is_empty() {
        results.push(
            IntegrityCheckResult::finding(
                CheckCategory::Delivery,
                "delivery_sequence_gap",
                Severity::Warning,
                "Delivery sequence numbers are not contiguous",
                format!("{} order(s) have gaps or repeated sequence numbers", broken.len()),
                broken.len() as u64,
            )
            .with_samples(
                broken
                    .iter()
                    .take(limits.sample_limit)
                    .map(|(row, report)| {
                        json!({
                            "order_id": row.order_id,
                            "order_number": row.order_number,
                            "missing": report.missing,
                            "duplicated": report.duplicated,
                            "out_of_range": report.out_of_range,
                        })
                    })
                    .collect(),
            )
            .with_actions(&["Inspect concurrent submissions for these orders"])
            .with_derivation("delivery_sequence per order must be exactly 1..=n"),
        );
    }

    let (stuck, pending): (Vec<&UnallocatedDeliveryRow>, Vec<&UnallocatedDeliveryRow>) = unallocated
        .iter()
        .partition(|d| now - d.created_at > limits.in_progress_grace);
    let sample = |rows: &[&UnallocatedDeliveryRow]| {
        capped(rows, limits.sample_limit, |d| {
            json!({
                "delivery_id": d.delivery_id,
                "order_id": d.order_id,
                "delivery_sequence": d.delivery_sequence,
                "total_amount": d.total_amount,
                "created_at": d.created_at,
            })
        })
    };
    if !stuck.is_empty() {
        results.push(
            IntegrityCheckResult::finding(
                CheckCategory::Delivery,
                "unallocated_delivery",
                Severity::Warning,
                "Deliveries recorded without inventory allocation",
                format!(
                    "{} delivery(ies) have money recorded but stock not reflected",
                    stuck.len()
                ),
                stuck.len() as u64,
            )
            .with_samples(sample(&stuck))
            .with_actions(&["Retry allocation for each delivery via POST /deliveries/{id}/allocate"])
            .with_derivation("deliveries.allocated_at IS NULL AND age > grace period")
            .in_progress(),
        );
    }
    if !pending.is_empty() {
        results.push(
            IntegrityCheckResult::finding(
                CheckCategory::Delivery,
                "allocation_in_flight",
                Severity::Info,
                "Deliveries currently being allocated",
                format!("{} recent delivery(ies) not yet allocated", pending.len()),
                pending.len() as u64,
            )
            .with_samples(sample(&pending))
            .with_derivation("deliveries.allocated_at IS NULL AND age <= grace period")
            .in_progress(),
        );
    }

    results
}

// ============================================================================
// Reference
// ============================================================================

pub fn check_references(counts: &[ReferenceCount], limits: &IntegrityLimits) -> Vec<IntegrityCheckResult> {
    let orphans: Vec<&ReferenceCount> = counts.iter().filter(|c| c.orphan_count > 0).collect();
    if orphans.is_empty() {
        return vec![IntegrityCheckResult::success(
            CheckCategory::Reference,
            "orphan_reference",
            "All references resolve",
            counts
                .iter()
                .map(|c| c.relation.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )];
    }

    orphans
        .into_iter()
        .map(|c| {
            IntegrityCheckResult::finding(
                CheckCategory::Reference,
                "orphan_reference",
                Severity::Critical,
                format!("Orphaned rows in {}", c.relation),
                format!("{} row(s) reference a missing target", c.orphan_count),
                c.orphan_count,
            )
            .with_samples(
                c.sample_ids
                    .iter()
                    .take(limits.sample_limit)
                    .map(|id| json!({ "id": id }))
                    .collect(),
            )
            .with_actions(&["Restore the missing parent rows or remove the orphans manually"])
            .with_derivation(c.relation.clone())
        })
        .collect()
}

// ============================================================================
// Business rules & data quality
// ============================================================================

/// Severity used for a rule-list category
pub fn rule_severity(category: CheckCategory) -> Severity {
    match category {
        CheckCategory::DataQuality => Severity::Info,
        _ => Severity::Warning,
    }
}

/// One result per violated rule; a single success entry when nothing is violated
pub fn check_rules(
    category: CheckCategory,
    violations: &[RuleViolation],
    limits: &IntegrityLimits,
) -> Vec<IntegrityCheckResult> {
    let violated: Vec<&RuleViolation> = violations.iter().filter(|v| v.count > 0).collect();
    if violated.is_empty() {
        let title = match category {
            CheckCategory::BusinessRule => "All business rules hold",
            _ => "No data quality issues found",
        };
        return vec![IntegrityCheckResult::success(
            category,
            format!("{}_rules", category.as_str()),
            title,
            violations
                .iter()
                .map(|v| v.check.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )];
    }

    violated
        .into_iter()
        .map(|v| {
            IntegrityCheckResult::finding(
                category,
                v.check.clone(),
                rule_severity(category),
                v.title.clone(),
                format!("{} record(s) affected", v.count),
                v.count,
            )
            .with_samples(v.samples.iter().take(limits.sample_limit).cloned().collect())
            .with_actions(&[v.suggested_action.as_str()])
            .with_derivation(v.derivation.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntegrityCheckSummary;
    use crate::models::OverallStatus;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn balance(total: &str, items: &str, delivered: &str, cached: &str) -> OrderBalanceRow {
        OrderBalanceRow {
            order_id: Uuid::new_v4(),
            order_number: "PO-1".to_string(),
            status: OrderStatus::Partial,
            total_amount: dec(total),
            items_total: dec(items),
            delivered_total: dec(delivered),
            remaining_cached: dec(cached),
        }
    }

    #[test]
    fn test_scenario_a_financial_and_delivery_success() {
        let rows = vec![balance("10000", "10000", "4000", "6000")];
        let limits = IntegrityLimits::default();

        let financial = check_financial(&rows, &limits);
        assert_eq!(financial.len(), 1);
        assert_eq!(financial[0].severity, Severity::Success);

        let seq = vec![SequenceRow {
            order_id: rows[0].order_id,
            order_number: "PO-1".to_string(),
            sequences: vec![1],
        }];
        let delivery = check_delivery(&rows, &seq, &[], Utc::now(), &limits);
        assert_eq!(delivery.len(), 1);
        assert_eq!(delivery[0].severity, Severity::Success);
    }

    #[test]
    fn test_financial_item_sum_mismatch_is_critical() {
        let rows = vec![balance("10000", "9000", "0", "10000")];
        let results = check_financial(&rows, &IntegrityLimits::default());
        assert_eq!(results[0].severity, Severity::Critical);
        assert_eq!(results[0].affected_records, 1);
        assert_eq!(results[0].sample_records.len(), 1);
    }

    #[test]
    fn test_samples_are_capped() {
        let rows: Vec<_> = (0..25).map(|_| balance("100", "90", "0", "100")).collect();
        let limits = IntegrityLimits { sample_limit: 5, ..IntegrityLimits::default() };
        let results = check_financial(&rows, &limits);
        assert_eq!(results[0].affected_records, 25);
        assert_eq!(results[0].sample_records.len(), 5);
    }

    #[test]
    fn test_scenario_e_inventory_mismatch_of_13() {
        let rows = vec![ProductStockRow {
            product_id: Uuid::new_v4(),
            code: "SKU-1".to_string(),
            current_stock: Decimal::ZERO,
            total_in: dec("17"),
            total_out: dec("4"),
        }];
        let results = check_inventory(&rows, &IntegrityLimits::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, Severity::Warning);
        assert_eq!(results[0].sample_records[0]["mismatch"], json!(dec("13")));
        assert!(results[0].description.contains("13 unit"));
    }

    #[test]
    fn test_inventory_within_tolerance_is_success() {
        let rows = vec![ProductStockRow {
            product_id: Uuid::new_v4(),
            code: "SKU-1".to_string(),
            current_stock: dec("12.9995"),
            total_in: dec("13"),
            total_out: Decimal::ZERO,
        }];
        let results = check_inventory(&rows, &IntegrityLimits::default());
        assert_eq!(results[0].severity, Severity::Success);
    }

    #[test]
    fn test_delivery_cache_drift_is_critical() {
        let rows = vec![balance("10000", "10000", "4000", "10000")];
        let results = check_delivery(&rows, &[], &[], Utc::now(), &IntegrityLimits::default());
        assert_eq!(results[0].severity, Severity::Critical);
    }

    #[test]
    fn test_unallocated_delivery_split_by_grace() {
        let now = Utc::now();
        let row = |age_secs: i64| UnallocatedDeliveryRow {
            delivery_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            delivery_sequence: 1,
            total_amount: dec("100"),
            created_at: now - Duration::seconds(age_secs),
        };
        let unallocated = vec![row(5), row(3_600)];
        let results = check_delivery(&[], &[], &unallocated, now, &IntegrityLimits::default());

        let stuck = results.iter().find(|r| r.check == "unallocated_delivery").unwrap();
        assert_eq!(stuck.severity, Severity::Warning);
        assert!(stuck.in_progress);
        let in_flight = results.iter().find(|r| r.check == "allocation_in_flight").unwrap();
        assert_eq!(in_flight.severity, Severity::Info);
    }

    #[test]
    fn test_sequence_gap_reported() {
        let seq = vec![SequenceRow {
            order_id: Uuid::new_v4(),
            order_number: "PO-9".to_string(),
            sequences: vec![1, 2, 2],
        }];
        let results = check_delivery(&[], &seq, &[], Utc::now(), &IntegrityLimits::default());
        assert!(results.iter().any(|r| r.check == "delivery_sequence_gap"));
    }

    #[test]
    fn test_orphans_are_critical_per_relation() {
        let counts = vec![
            ReferenceCount {
                relation: "purchase_order_items.order_id -> purchase_orders".to_string(),
                orphan_count: 0,
                sample_ids: vec![],
            },
            ReferenceCount {
                relation: "inventory_movements.product_id -> products".to_string(),
                orphan_count: 2,
                sample_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
            },
        ];
        let results = check_references(&counts, &IntegrityLimits::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, Severity::Critical);
        assert_eq!(results[0].affected_records, 2);
    }

    #[test]
    fn test_rule_severities() {
        let violation = RuleViolation {
            check: "negative_stock".to_string(),
            title: "Products with negative stock".to_string(),
            count: 1,
            samples: vec![],
            suggested_action: "Investigate".to_string(),
            derivation: "products.current_stock < 0".to_string(),
        };
        let limits = IntegrityLimits::default();
        let business = check_rules(CheckCategory::BusinessRule, &[violation.clone()], &limits);
        assert_eq!(business[0].severity, Severity::Warning);
        let quality = check_rules(CheckCategory::DataQuality, &[violation], &limits);
        assert_eq!(quality[0].severity, Severity::Info);

        let clean = check_rules(CheckCategory::DataQuality, &[], &limits);
        assert_eq!(clean[0].severity, Severity::Success);

        let summary = IntegrityCheckSummary::from_results(&[business, quality, clean].concat());
        assert_eq!(summary.overall_status, OverallStatus::NeedsAttention);
    }
}
