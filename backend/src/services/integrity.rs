//! Integrity verification engine
//!
//! Each category is one read-only store query set feeding a pure evaluator from
//! `shared::integrity`. Categories run concurrently under their own timeout; a category that
//! fails or times out becomes a critical result and never aborts the others.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{
    order_status_from_str, CheckCategory, IntegrityCheckResult, IntegrityCheckSummary,
    IntegrityReport, IntegrityResultRow,
};
use shared::integrity::{
    check_delivery, check_financial, check_inventory, check_references, check_rules,
    IntegrityLimits, OrderBalanceRow, ProductStockRow, ReferenceCount, RuleViolation, SequenceRow,
    UnallocatedDeliveryRow,
};

#[derive(Clone)]
pub struct IntegrityService {
    db: PgPool,
    limits: IntegrityLimits,
    check_timeout: Duration,
}

// ============================================================================
// Store queries
// ============================================================================

#[derive(Debug, FromRow)]
struct OrderBalanceDbRow {
    order_id: Uuid,
    order_number: String,
    status: String,
    total_amount: Decimal,
    items_total: Decimal,
    delivered_total: Decimal,
    remaining_cached: Decimal,
}

impl From<OrderBalanceDbRow> for OrderBalanceRow {
    fn from(row: OrderBalanceDbRow) -> Self {
        OrderBalanceRow {
            order_id: row.order_id,
            order_number: row.order_number,
            status: order_status_from_str(&row.status),
            total_amount: row.total_amount,
            items_total: row.items_total,
            delivered_total: row.delivered_total,
            remaining_cached: row.remaining_cached,
        }
    }
}

#[derive(Debug, FromRow)]
struct ProductStockDbRow {
    product_id: Uuid,
    code: String,
    current_stock: Decimal,
    total_in: Decimal,
    total_out: Decimal,
}

impl From<ProductStockDbRow> for ProductStockRow {
    fn from(row: ProductStockDbRow) -> Self {
        ProductStockRow {
            product_id: row.product_id,
            code: row.code,
            current_stock: row.current_stock,
            total_in: row.total_in,
            total_out: row.total_out,
        }
    }
}

#[derive(Debug, FromRow)]
struct SequenceDbRow {
    order_id: Uuid,
    order_number: String,
    sequences: Vec<i32>,
}

#[derive(Debug, FromRow)]
struct UnallocatedDbRow {
    delivery_id: Uuid,
    order_id: Uuid,
    delivery_sequence: i32,
    total_amount: Decimal,
    created_at: DateTime<Utc>,
}

/// Stored totals next to item sums and confirmed delivery sums, one row per order
pub async fn load_order_balances(conn: &mut PgConnection) -> AppResult<Vec<OrderBalanceRow>> {
    let rows = sqlx::query_as::<_, OrderBalanceDbRow>(
        r#"
        SELECT o.id AS order_id, o.order_number, o.status, o.total_amount,
               COALESCE(i.items_total, 0) AS items_total,
               COALESCE(d.delivered_total, 0) AS delivered_total,
               o.remaining_amount AS remaining_cached
        FROM purchase_orders o
        LEFT JOIN (
            SELECT order_id, SUM(total_amount) AS items_total
            FROM purchase_order_items
            GROUP BY order_id
        ) i ON i.order_id = o.id
        LEFT JOIN (
            SELECT order_id, SUM(total_amount) AS delivered_total
            FROM deliveries
            WHERE status = 'confirmed'
            GROUP BY order_id
        ) d ON d.order_id = o.id
        ORDER BY o.created_at, o.id
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Stock cache next to movement sums, one row per product
pub async fn load_product_stock(conn: &mut PgConnection) -> AppResult<Vec<ProductStockRow>> {
    let rows = sqlx::query_as::<_, ProductStockDbRow>(
        r#"
        SELECT p.id AS product_id, p.code, p.current_stock,
               COALESCE(SUM(m.quantity) FILTER (WHERE m.movement_type = 'in'), 0) AS total_in,
               COALESCE(SUM(m.quantity) FILTER (WHERE m.movement_type = 'out'), 0) AS total_out
        FROM products p
        LEFT JOIN inventory_movements m ON m.product_id = p.id
        GROUP BY p.id, p.code, p.current_stock
        ORDER BY p.code, p.id
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

async fn load_sequences(conn: &mut PgConnection) -> AppResult<Vec<SequenceRow>> {
    let rows = sqlx::query_as::<_, SequenceDbRow>(
        r#"
        SELECT o.id AS order_id, o.order_number,
               array_agg(d.delivery_sequence ORDER BY d.delivery_sequence) AS sequences
        FROM purchase_orders o
        JOIN deliveries d ON d.order_id = o.id AND d.status = 'confirmed'
        GROUP BY o.id, o.order_number
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| SequenceRow {
            order_id: r.order_id,
            order_number: r.order_number,
            sequences: r.sequences,
        })
        .collect())
}

async fn load_unallocated(conn: &mut PgConnection) -> AppResult<Vec<UnallocatedDeliveryRow>> {
    let rows = sqlx::query_as::<_, UnallocatedDbRow>(
        r#"
        SELECT id AS delivery_id, order_id, delivery_sequence, total_amount, created_at
        FROM deliveries
        WHERE status = 'confirmed' AND allocated_at IS NULL
        ORDER BY created_at
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| UnallocatedDeliveryRow {
            delivery_id: r.delivery_id,
            order_id: r.order_id,
            delivery_sequence: r.delivery_sequence,
            total_amount: r.total_amount,
            created_at: r.created_at,
        })
        .collect())
}

/// Child relations whose parent must exist; each query selects the orphaned child ids
const REFERENCES: [(&str, &str); 6] = [
    (
        "purchase_order_items.order_id -> purchase_orders",
        "SELECT c.id FROM purchase_order_items c LEFT JOIN purchase_orders p ON p.id = c.order_id WHERE p.id IS NULL",
    ),
    (
        "purchase_order_items.product_id -> products",
        "SELECT c.id FROM purchase_order_items c LEFT JOIN products p ON p.id = c.product_id WHERE p.id IS NULL",
    ),
    (
        "deliveries.order_id -> purchase_orders",
        "SELECT c.id FROM deliveries c LEFT JOIN purchase_orders p ON p.id = c.order_id WHERE p.id IS NULL",
    ),
    (
        "inventory_movements.product_id -> products",
        "SELECT c.id FROM inventory_movements c LEFT JOIN products p ON p.id = c.product_id WHERE p.id IS NULL",
    ),
    (
        "inventory_movements.delivery_id -> deliveries",
        "SELECT c.id FROM inventory_movements c LEFT JOIN deliveries p ON p.id = c.delivery_id \
         WHERE c.delivery_id IS NOT NULL AND p.id IS NULL",
    ),
    (
        "accounting_allocations.delivery_id -> deliveries",
        "SELECT c.id FROM accounting_allocations c LEFT JOIN deliveries p ON p.id = c.delivery_id WHERE p.id IS NULL",
    ),
];

async fn load_reference_counts(
    conn: &mut PgConnection,
    sample_limit: usize,
) -> AppResult<Vec<ReferenceCount>> {
    let mut counts = Vec::with_capacity(REFERENCES.len());
    for (relation, orphans) in REFERENCES {
        let (count, sample_ids) = sqlx::query_as::<_, (i64, Vec<Uuid>)>(&format!(
            "SELECT COUNT(*)::bigint, COALESCE((array_agg(o.id))[1:$1], '{{}}') FROM ({}) o",
            orphans
        ))
        .bind(sample_limit as i32)
        .fetch_one(&mut *conn)
        .await?;

        counts.push(ReferenceCount {
            relation: relation.to_string(),
            orphan_count: count.max(0) as u64,
            sample_ids,
        });
    }
    Ok(counts)
}

/// A fixed rule: rows selected by `query` violate it
struct Rule {
    check: &'static str,
    title: &'static str,
    action: &'static str,
    query: &'static str,
}

const BUSINESS_RULES: [Rule; 4] = [
    Rule {
        check: "negative_stock",
        title: "Products with negative stock",
        action: "Review outgoing movements for these products",
        query: "SELECT id, code, current_stock FROM products WHERE current_stock < 0",
    },
    Rule {
        check: "future_dated_transaction",
        title: "Transactions timestamped in the future",
        action: "Check the clock of the recording host and the affected rows",
        query: "SELECT id, 'delivery' AS kind, created_at FROM deliveries \
                WHERE created_at > NOW() + INTERVAL '5 minutes' \
                UNION ALL \
                SELECT id, 'movement' AS kind, created_at FROM inventory_movements \
                WHERE created_at > NOW() + INTERVAL '5 minutes'",
    },
    Rule {
        check: "non_positive_order_total",
        title: "Orders with a zero or negative total",
        action: "Correct the order items or cancel the order",
        query: "SELECT id, order_number, total_amount FROM purchase_orders WHERE total_amount <= 0",
    },
    Rule {
        check: "overdue_open_order",
        title: "Overdue orders with an open balance",
        action: "Follow up with the partner or extend the delivery deadline",
        query: "SELECT o.id, o.order_number, o.delivery_deadline, \
                       o.total_amount - COALESCE(SUM(d.total_amount), 0) AS remaining_derived \
                FROM purchase_orders o \
                LEFT JOIN deliveries d ON d.order_id = o.id AND d.status = 'confirmed' \
                WHERE o.status IN ('undelivered', 'partial') \
                  AND o.delivery_deadline < CURRENT_DATE \
                GROUP BY o.id \
                HAVING o.total_amount - COALESCE(SUM(d.total_amount), 0) > 0",
    },
];

const DATA_QUALITY_RULES: [Rule; 3] = [
    Rule {
        check: "duplicate_product_code",
        title: "Product codes used more than once",
        action: "Merge or rename the duplicated products",
        query: "SELECT code, COUNT(*) AS occurrences FROM products GROUP BY code HAVING COUNT(*) > 1",
    },
    Rule {
        check: "empty_required_text",
        title: "Records with empty required text",
        action: "Fill in the missing names and numbers",
        query: "SELECT id, 'order' AS kind FROM purchase_orders \
                WHERE btrim(order_number) = '' OR btrim(partner_name) = '' \
                UNION ALL \
                SELECT id, 'product' AS kind FROM products \
                WHERE btrim(code) = '' OR btrim(name) = ''",
    },
    Rule {
        check: "negative_price",
        title: "Negative unit prices",
        action: "Correct the unit price on the product or order item",
        query: "SELECT id, 'product' AS kind, unit_price FROM products WHERE unit_price < 0 \
                UNION ALL \
                SELECT id, 'order_item' AS kind, unit_price FROM purchase_order_items WHERE unit_price < 0",
    },
];

async fn load_violations(
    conn: &mut PgConnection,
    rules: &[Rule],
    sample_limit: usize,
) -> AppResult<Vec<RuleViolation>> {
    let mut violations = Vec::with_capacity(rules.len());
    for rule in rules {
        let (count, samples) = sqlx::query_as::<_, (i64, Value)>(&format!(
            r#"
            SELECT (SELECT COUNT(*) FROM ({q}) c)::bigint,
                   COALESCE((SELECT jsonb_agg(s) FROM (SELECT * FROM ({q}) q LIMIT $1) s), '[]'::jsonb)
            "#,
            q = rule.query
        ))
        .bind(sample_limit as i64)
        .fetch_one(&mut *conn)
        .await?;

        violations.push(RuleViolation {
            check: rule.check.to_string(),
            title: rule.title.to_string(),
            count: count.max(0) as u64,
            samples: match samples {
                Value::Array(rows) => rows,
                _ => Vec::new(),
            },
            suggested_action: rule.action.to_string(),
            derivation: rule.query.to_string(),
        });
    }
    Ok(violations)
}

// ============================================================================
// Engine
// ============================================================================

/// Run one category under a timeout, converting failures into a critical result
pub async fn run_check<F>(
    category: CheckCategory,
    timeout: Duration,
    check: F,
) -> Vec<IntegrityCheckResult>
where
    F: Future<Output = AppResult<Vec<IntegrityCheckResult>>>,
{
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            tracing::warn!(category = category.as_str(), error = %e, "Integrity check failed");
            vec![IntegrityCheckResult::execution_failure(category, e)]
        }
        Err(_) => {
            tracing::warn!(
                category = category.as_str(),
                timeout_secs = timeout.as_secs(),
                "Integrity check timed out"
            );
            vec![IntegrityCheckResult::execution_failure(
                category,
                format!("timed out after {}s", timeout.as_secs_f64()),
            )]
        }
    }
}

/// CSV rendering of the result list
pub fn export_to_csv(results: &[IntegrityCheckResult]) -> AppResult<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for result in results {
        wtr.serialize(IntegrityResultRow::from(result))
            .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))
}

impl IntegrityService {
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            db,
            limits: config.integrity_limits(),
            check_timeout: config.check_timeout(),
        }
    }

    /// Run all six categories and summarize
    pub async fn run_all(&self) -> IntegrityReport {
        let started_at = Utc::now();
        let timeout = self.check_timeout;

        let (financial, inventory, delivery, reference, business, quality) = tokio::join!(
            run_check(CheckCategory::Financial, timeout, self.financial()),
            run_check(CheckCategory::Inventory, timeout, self.inventory()),
            run_check(CheckCategory::Delivery, timeout, self.delivery()),
            run_check(CheckCategory::Reference, timeout, self.references()),
            run_check(
                CheckCategory::BusinessRule,
                timeout,
                self.rules(CheckCategory::BusinessRule, &BUSINESS_RULES)
            ),
            run_check(
                CheckCategory::DataQuality,
                timeout,
                self.rules(CheckCategory::DataQuality, &DATA_QUALITY_RULES)
            ),
        );

        let results: Vec<IntegrityCheckResult> = [financial, inventory, delivery, reference, business, quality]
            .into_iter()
            .flatten()
            .collect();
        let summary = IntegrityCheckSummary::from_results(&results);
        let store_diagnostics = self.diagnostics().await;
        let finished_at = Utc::now();

        tracing::info!(
            checks = summary.total_checks,
            critical = summary.critical,
            warning = summary.warning,
            status = ?summary.overall_status,
            "Integrity run finished"
        );

        IntegrityReport {
            summary,
            results,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            store_diagnostics,
        }
    }

    /// Opaque record from `ledger_diagnostics()`; absent when the procedure fails
    pub async fn diagnostics(&self) -> Option<Value> {
        match sqlx::query_scalar::<_, Value>("SELECT ledger_diagnostics()")
            .fetch_one(&self.db)
            .await
        {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "ledger_diagnostics() failed");
                None
            }
        }
    }

    /// Read-only snapshot for one category
    async fn snapshot(&self) -> AppResult<Transaction<'static, Postgres>> {
        let mut tx = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn financial(&self) -> AppResult<Vec<IntegrityCheckResult>> {
        let mut tx = self.snapshot().await?;
        let balances = load_order_balances(&mut tx).await?;
        tx.rollback().await?;
        Ok(check_financial(&balances, &self.limits))
    }

    async fn inventory(&self) -> AppResult<Vec<IntegrityCheckResult>> {
        let mut tx = self.snapshot().await?;
        let stock = load_product_stock(&mut tx).await?;
        tx.rollback().await?;
        Ok(check_inventory(&stock, &self.limits))
    }

    async fn delivery(&self) -> AppResult<Vec<IntegrityCheckResult>> {
        let mut tx = self.snapshot().await?;
        let balances = load_order_balances(&mut tx).await?;
        let sequences = load_sequences(&mut tx).await?;
        let unallocated = load_unallocated(&mut tx).await?;
        tx.rollback().await?;
        Ok(check_delivery(
            &balances,
            &sequences,
            &unallocated,
            Utc::now(),
            &self.limits,
        ))
    }

    async fn references(&self) -> AppResult<Vec<IntegrityCheckResult>> {
        let mut tx = self.snapshot().await?;
        let counts = load_reference_counts(&mut tx, self.limits.sample_limit).await?;
        tx.rollback().await?;
        Ok(check_references(&counts, &self.limits))
    }

    async fn rules(
        &self,
        category: CheckCategory,
        rules: &[Rule],
    ) -> AppResult<Vec<IntegrityCheckResult>> {
        let mut tx = self.snapshot().await?;
        let violations = load_violations(&mut tx, rules, self.limits.sample_limit).await?;
        tx.rollback().await?;
        Ok(check_rules(category, &violations, &self.limits))
    }
}
