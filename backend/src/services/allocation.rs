//! Inventory allocator: materializes a recorded delivery into stock movements and
//! accounting allocations.
//!
//! Everything for one delivery is written in a single transaction holding the delivery row
//! lock, and `allocated_at` is stamped last. A failed run therefore leaves no trace and the
//! delivery stays in the `recorded` state, from which [`AllocationService::allocate`] can be
//! retried any number of times.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    AccountingAllocation, AllocationRow, Delivery, DeliveryRow, DeliveryStatus, InventoryMovement,
    MovementRow, DELIVERY_COLUMNS,
};
use crate::services::order::load_items;
use shared::{plan_allocation, AllocationPlan};

#[derive(Clone)]
pub struct AllocationService {
    db: PgPool,
}

/// What an allocation run did
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AllocationResult {
    Applied {
        movements_created: usize,
        allocations_created: usize,
        allocated_at: DateTime<Utc>,
    },
    /// Movements or allocations already exist; nothing was written
    AlreadyMaterialized { allocated_at: DateTime<Utc> },
}

impl AllocationResult {
    pub fn created(&self) -> (usize, usize) {
        match self {
            AllocationResult::Applied {
                movements_created,
                allocations_created,
                ..
            } => (*movements_created, *allocations_created),
            AllocationResult::AlreadyMaterialized { .. } => (0, 0),
        }
    }

    pub fn allocated_at(&self) -> DateTime<Utc> {
        match self {
            AllocationResult::Applied { allocated_at, .. }
            | AllocationResult::AlreadyMaterialized { allocated_at } => *allocated_at,
        }
    }
}

/// Net stock change per product, ordered by product id.
///
/// Concurrent allocations touching the same products lock them in the same order.
pub fn ordered_stock_deltas(plan: &AllocationPlan) -> Vec<(Uuid, Decimal)> {
    let mut deltas: Vec<(Uuid, Decimal)> = plan
        .stock_deltas()
        .into_iter()
        .filter(|(_, delta)| !delta.is_zero())
        .collect();
    deltas.sort_by_key(|(product_id, _)| *product_id);
    deltas
}

impl AllocationService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Materialize a recorded delivery. Safe to call repeatedly.
    pub async fn allocate(&self, delivery_id: Uuid) -> AppResult<AllocationResult> {
        let mut tx = self.db.begin().await?;

        let delivery: Delivery = sqlx::query_as::<_, DeliveryRow>(&format!(
            "SELECT {} FROM deliveries WHERE id = $1 FOR UPDATE",
            DELIVERY_COLUMNS
        ))
        .bind(delivery_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery".to_string()))?
        .into();

        if let Some(allocated_at) = delivery.allocated_at {
            tx.rollback().await?;
            return Ok(AllocationResult::AlreadyMaterialized { allocated_at });
        }

        if delivery.status != DeliveryStatus::Confirmed {
            return Err(AppError::Conflict {
                resource: "delivery".to_string(),
                message: format!(
                    "Delivery #{} is {} and cannot be allocated",
                    delivery.delivery_sequence,
                    delivery.status.as_str()
                ),
            });
        }

        if has_materialized_rows(&mut tx, delivery_id).await? {
            // rows without the marker: only repair the marker
            let allocated_at = stamp_allocated(&mut tx, delivery_id).await?;
            tx.commit().await?;
            tracing::warn!(
                delivery_id = %delivery_id,
                "Delivery had allocation rows without allocated_at; marker repaired"
            );
            return Ok(AllocationResult::AlreadyMaterialized { allocated_at });
        }

        let order_total = sqlx::query_scalar::<_, Decimal>(
            "SELECT total_amount FROM purchase_orders WHERE id = $1",
        )
        .bind(delivery.order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))?;

        let items = load_items(&mut tx, delivery.order_id).await?;
        let plan = plan_allocation(
            order_total,
            &items,
            delivery.total_amount,
            delivery.mode,
            &delivery.requested_quantities,
        );

        for movement in &plan.movements {
            sqlx::query(
                r#"
                INSERT INTO inventory_movements (product_id, movement_type, quantity, unit_price,
                                                 total_amount, delivery_id, order_item_id, delivery_sequence)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(movement.product_id)
            .bind(movement.movement_type.as_str())
            .bind(movement.quantity)
            .bind(movement.unit_price)
            .bind(movement.total_amount)
            .bind(delivery_id)
            .bind(movement.order_item_id)
            .bind(delivery.delivery_sequence)
            .execute(&mut *tx)
            .await?;
        }

        for (product_id, delta) in ordered_stock_deltas(&plan) {
            sqlx::query_scalar::<_, Decimal>("SELECT increment_product_stock($1, $2)")
                .bind(product_id)
                .bind(delta)
                .fetch_one(&mut *tx)
                .await?;
        }

        for allocation in &plan.allocations {
            sqlx::query(
                r#"
                INSERT INTO accounting_allocations (delivery_id, product_id, order_item_id,
                                                    allocated_amount, allocation_ratio, method)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(delivery_id)
            .bind(allocation.product_id)
            .bind(allocation.order_item_id)
            .bind(allocation.allocated_amount)
            .bind(allocation.allocation_ratio)
            .bind(allocation.method.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let allocated_at = stamp_allocated(&mut tx, delivery_id).await?;
        tx.commit().await?;

        tracing::info!(
            delivery_id = %delivery_id,
            sequence = delivery.delivery_sequence,
            mode = delivery.mode.as_str(),
            ratio = %plan.ratio,
            movements = plan.movements.len(),
            allocations = plan.allocations.len(),
            "Delivery allocated"
        );

        Ok(AllocationResult::Applied {
            movements_created: plan.movements.len(),
            allocations_created: plan.allocations.len(),
            allocated_at,
        })
    }

    pub async fn list_movements(&self, delivery_id: Uuid) -> AppResult<Vec<InventoryMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT id, product_id, movement_type, quantity, unit_price, total_amount,
                   delivery_id, order_item_id, delivery_sequence, created_at
            FROM inventory_movements
            WHERE delivery_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(delivery_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn list_allocations(&self, delivery_id: Uuid) -> AppResult<Vec<AccountingAllocation>> {
        let rows = sqlx::query_as::<_, AllocationRow>(
            r#"
            SELECT id, delivery_id, product_id, order_item_id, allocated_amount,
                   allocation_ratio, method, created_at
            FROM accounting_allocations
            WHERE delivery_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(delivery_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

async fn has_materialized_rows(conn: &mut PgConnection, delivery_id: Uuid) -> AppResult<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(SELECT 1 FROM inventory_movements WHERE delivery_id = $1)
            OR EXISTS(SELECT 1 FROM accounting_allocations WHERE delivery_id = $1)
        "#,
    )
    .bind(delivery_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

async fn stamp_allocated(conn: &mut PgConnection, delivery_id: Uuid) -> AppResult<DateTime<Utc>> {
    let allocated_at = sqlx::query_scalar::<_, DateTime<Utc>>(
        "UPDATE deliveries SET allocated_at = NOW() WHERE id = $1 RETURNING allocated_at",
    )
    .bind(delivery_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(allocated_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{DeliveryMode, ItemQuantity, PurchaseOrderItem};

    fn item(product_id: Uuid, quantity: i64, unit_price: i64) -> PurchaseOrderItem {
        PurchaseOrderItem {
            id: Uuid::new_v4(),
            order_id: Uuid::nil(),
            product_id,
            quantity: Decimal::from(quantity),
            unit_price: Decimal::from(unit_price),
            total_amount: Decimal::from(quantity * unit_price),
        }
    }

    #[test]
    fn test_deltas_are_sorted_and_merged_per_product() {
        let shared_product = Uuid::new_v4();
        let other_product = Uuid::new_v4();
        let items = vec![
            item(shared_product, 10, 100),
            item(other_product, 5, 200),
            item(shared_product, 4, 500),
        ];
        let quantities: Vec<ItemQuantity> = items
            .iter()
            .map(|i| ItemQuantity {
                item_id: i.id,
                quantity: Decimal::from(2),
            })
            .collect();

        let plan = plan_allocation(
            Decimal::from(5_000),
            &items,
            Decimal::from(1_000),
            DeliveryMode::AmountAndQuantity,
            &quantities,
        );
        let deltas = ordered_stock_deltas(&plan);

        assert_eq!(deltas.len(), 2);
        assert!(deltas[0].0 < deltas[1].0);
        let merged = deltas.iter().find(|(p, _)| *p == shared_product).unwrap();
        assert_eq!(merged.1, Decimal::from(4));
    }

    #[test]
    fn test_amount_only_plan_touches_no_stock() {
        let items = vec![item(Uuid::new_v4(), 10, 100)];
        let plan = plan_allocation(
            Decimal::from(1_000),
            &items,
            Decimal::from(400),
            DeliveryMode::AmountOnly,
            &[],
        );
        assert!(ordered_stock_deltas(&plan).is_empty());
        assert_eq!(plan.allocations.len(), 1);
    }

    #[test]
    fn test_result_counts() {
        let now = Utc::now();
        let applied = AllocationResult::Applied {
            movements_created: 2,
            allocations_created: 3,
            allocated_at: now,
        };
        assert_eq!(applied.created(), (2, 3));
        assert_eq!(
            AllocationResult::AlreadyMaterialized { allocated_at: now }.created(),
            (0, 0)
        );
    }
}
