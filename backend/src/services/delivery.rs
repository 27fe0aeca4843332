//! Delivery pipeline: validation, duplicate guard, recording and allocation.
//!
//! A submission runs `validated -> recorded -> allocated`. Recording happens in one
//! transaction that holds the order row lock, so the remaining balance and the next sequence
//! number are derived and consumed without interleaving. Allocation runs afterwards in its
//! own transaction; if it fails the delivery stays recorded and the caller receives a
//! partial failure pointing at the retry endpoint.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{unique_violation, AppError, AppResult};
use crate::models::{
    compose_memo, derive_order_status, AccountingAllocation, Delivery, DeliveryOutcome,
    DeliveryRequest, DeliveryRow, InventoryMovement, PipelineState, DELIVERY_COLUMNS,
};
use crate::services::allocation::AllocationService;
use crate::services::order::load_snapshot;
use shared::{
    find_duplicate, validate_delivery, validate_idempotency_key, DuplicatePolicy,
    NormalizedDelivery, RecentDelivery, ValidationPolicy,
};

#[derive(Clone)]
pub struct DeliveryService {
    db: PgPool,
    validation: ValidationPolicy,
    duplicates: DuplicatePolicy,
}

/// A delivery together with what it materialized into
#[derive(Debug, Serialize)]
pub struct DeliveryDetail {
    #[serde(flatten)]
    pub delivery: Delivery,
    pub state: PipelineState,
    pub movements: Vec<InventoryMovement>,
    pub allocations: Vec<AccountingAllocation>,
}

#[derive(Debug, FromRow)]
struct RecentDeliveryRow {
    id: Uuid,
    delivery_sequence: i32,
    total_amount: Decimal,
    created_at: DateTime<Utc>,
}

impl From<RecentDeliveryRow> for RecentDelivery {
    fn from(row: RecentDeliveryRow) -> Self {
        RecentDelivery {
            id: row.id,
            delivery_sequence: row.delivery_sequence,
            amount: row.total_amount,
            created_at: row.created_at,
        }
    }
}

/// Outcome of the recording step
enum Recorded {
    New {
        delivery: Delivery,
        remaining_amount: Decimal,
        warnings: Vec<String>,
    },
    Replay(Delivery),
}

impl DeliveryService {
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            db,
            validation: config.validation_policy(),
            duplicates: config.duplicate_policy(),
        }
    }

    /// Run the full pipeline for one submission
    pub async fn submit(&self, order_id: Uuid, request: DeliveryRequest) -> AppResult<DeliveryOutcome> {
        if let Some(key) = request.idempotency_key.as_deref() {
            validate_idempotency_key(key).map_err(|msg| AppError::Validation {
                field: "idempotency_key".to_string(),
                message: msg.to_string(),
            })?;
        }

        match self.record(order_id, &request).await? {
            Recorded::New {
                delivery,
                remaining_amount,
                warnings,
            } => {
                let mut outcome = self.materialize(delivery, remaining_amount).await?;
                outcome.warnings = warnings;
                Ok(outcome)
            }
            Recorded::Replay(delivery) => {
                tracing::info!(
                    delivery_id = %delivery.id,
                    order_id = %order_id,
                    "Idempotent resubmission; returning stored delivery"
                );
                let remaining_amount = self.derived_remaining(order_id).await?;
                let mut outcome = self.materialize(delivery, remaining_amount).await?;
                outcome.replayed = true;
                Ok(outcome)
            }
        }
    }

    /// Retry allocation for a delivery left in the recorded state
    pub async fn retry_allocation(&self, delivery_id: Uuid) -> AppResult<DeliveryOutcome> {
        let delivery = self.get_delivery_row(delivery_id).await?;
        let remaining_amount = self.derived_remaining(delivery.order_id).await?;
        self.materialize(delivery, remaining_amount).await
    }

    /// Confirmed and cancelled deliveries of an order, by sequence
    pub async fn list_deliveries(&self, order_id: Uuid) -> AppResult<Vec<Delivery>> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM purchase_orders WHERE id = $1)",
        )
        .bind(order_id)
        .fetch_one(&self.db)
        .await?;
        if !exists {
            return Err(AppError::NotFound("Purchase order".to_string()));
        }

        let rows = sqlx::query_as::<_, DeliveryRow>(&format!(
            "SELECT {} FROM deliveries WHERE order_id = $1 ORDER BY delivery_sequence",
            DELIVERY_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn get_delivery(&self, delivery_id: Uuid) -> AppResult<DeliveryDetail> {
        let delivery = self.get_delivery_row(delivery_id).await?;
        let allocator = AllocationService::new(self.db.clone());
        let movements = allocator.list_movements(delivery_id).await?;
        let allocations = allocator.list_allocations(delivery_id).await?;

        Ok(DeliveryDetail {
            state: delivery.pipeline_state(),
            delivery,
            movements,
            allocations,
        })
    }

    // ========================================================================
    // Pipeline steps
    // ========================================================================

    /// Validate, guard and insert under the order lock
    async fn record(&self, order_id: Uuid, request: &DeliveryRequest) -> AppResult<Recorded> {
        let mut tx = self.db.begin().await?;
        let snapshot = load_snapshot(&mut tx, order_id, true).await?;

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = find_by_idempotency_key(&mut tx, order_id, key).await? {
                tx.rollback().await?;
                return Ok(Recorded::Replay(existing));
            }
        }

        let normalized = validate_delivery(&snapshot, request, &self.validation)?;
        let now = Utc::now();

        let recent: Vec<RecentDelivery> = sqlx::query_as::<_, RecentDeliveryRow>(
            r#"
            SELECT id, delivery_sequence, total_amount, created_at
            FROM deliveries
            WHERE order_id = $1 AND status = 'confirmed' AND created_at >= $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(order_id)
        .bind(self.duplicates.lookback_start(now))
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

        // a fresh key per click does not exempt a submission from the time window
        guard_duplicate(&recent, &normalized, now, &self.duplicates)?;

        let sequence = snapshot.next_sequence();
        let memo = compose_memo(
            &snapshot.order.order_number,
            sequence,
            normalized.mode,
            normalized.reason,
            normalized.memo.as_deref(),
        );

        let delivery: Delivery = insert_delivery(
            &mut tx,
            NewDelivery {
                order_id,
                amount: normalized.amount,
                sequence,
                transaction_date: normalized.scheduled_date,
                mode: normalized.mode.as_str(),
                reason: normalized.reason.map(|r| r.as_str()),
                memo: &memo,
                quantities: &normalized.quantities,
                idempotency_key: normalized.idempotency_key.as_deref(),
                created_at: now,
            },
        )
        .await?;

        let delivered_amount = snapshot.delivered_amount + normalized.amount;
        let remaining_amount = snapshot.remaining_amount() - normalized.amount;
        let status = derive_order_status(snapshot.order.status, delivered_amount, remaining_amount);

        sqlx::query(
            r#"
            UPDATE purchase_orders
            SET remaining_amount = $1, status = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(remaining_amount)
        .bind(status.as_str())
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            delivery_id = %delivery.id,
            order_id = %order_id,
            sequence = sequence,
            amount = %normalized.amount,
            mode = normalized.mode.as_str(),
            remaining = %remaining_amount,
            status = status.as_str(),
            "Delivery recorded"
        );
        for warning in &normalized.warnings {
            tracing::warn!(delivery_id = %delivery.id, "{}", warning);
        }

        Ok(Recorded::New {
            delivery,
            remaining_amount,
            warnings: normalized.warnings,
        })
    }

    /// Allocate if still pending and build the outcome
    async fn materialize(&self, mut delivery: Delivery, remaining_amount: Decimal) -> AppResult<DeliveryOutcome> {
        let allocator = AllocationService::new(self.db.clone());
        let result = allocator.allocate(delivery.id).await.map_err(|e| {
            if matches!(e, AppError::Conflict { .. } | AppError::NotFound(_)) {
                return e;
            }
            tracing::warn!(
                delivery_id = %delivery.id,
                sequence = delivery.delivery_sequence,
                error = %e,
                "Allocation failed; delivery left in recorded state"
            );
            AppError::PartialFailure {
                delivery_id: delivery.id,
                sequence: delivery.delivery_sequence,
                reason: e.to_string(),
            }
        })?;

        delivery.allocated_at = Some(result.allocated_at());
        let (movements_created, allocations_created) = result.created();

        Ok(DeliveryOutcome {
            state: delivery.pipeline_state(),
            delivery,
            movements_created,
            allocations_created,
            replayed: false,
            remaining_amount,
            warnings: Vec::new(),
        })
    }

    async fn get_delivery_row(&self, delivery_id: Uuid) -> AppResult<Delivery> {
        let row = sqlx::query_as::<_, DeliveryRow>(&format!(
            "SELECT {} FROM deliveries WHERE id = $1",
            DELIVERY_COLUMNS
        ))
        .bind(delivery_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery".to_string()))?;

        Ok(row.into())
    }

    /// `total - sum(confirmed deliveries)`, never the cached column
    async fn derived_remaining(&self, order_id: Uuid) -> AppResult<Decimal> {
        let remaining = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT o.total_amount - COALESCE((
                SELECT SUM(d.total_amount) FROM deliveries d
                WHERE d.order_id = o.id AND d.status = 'confirmed'
            ), 0)
            FROM purchase_orders o
            WHERE o.id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))?;

        Ok(remaining)
    }
}

/// Reject a submission that repeats a recent delivery of the same amount
fn guard_duplicate(
    recent: &[RecentDelivery],
    normalized: &NormalizedDelivery,
    now: DateTime<Utc>,
    policy: &DuplicatePolicy,
) -> AppResult<()> {
    match find_duplicate(recent, normalized.amount, now, policy) {
        Some(dup) => Err(AppError::DuplicateSubmission {
            existing_id: dup.id,
            sequence: dup.delivery_sequence,
            age_secs: (now - dup.created_at).num_seconds(),
        }),
        None => Ok(()),
    }
}

struct NewDelivery<'a> {
    order_id: Uuid,
    amount: Decimal,
    sequence: i32,
    transaction_date: NaiveDate,
    mode: &'static str,
    reason: Option<&'static str>,
    memo: &'a str,
    quantities: &'a [shared::ItemQuantity],
    idempotency_key: Option<&'a str>,
    created_at: DateTime<Utc>,
}

async fn insert_delivery(conn: &mut PgConnection, new: NewDelivery<'_>) -> AppResult<Delivery> {
    let row = sqlx::query_as::<_, DeliveryRow>(&format!(
        r#"
        INSERT INTO deliveries (id, order_id, total_amount, delivery_sequence, transaction_date,
                                status, mode, reason, memo, requested_quantities, idempotency_key,
                                created_at)
        VALUES ($1, $2, $3, $4, $5, 'confirmed', $6, $7, $8, $9, $10, $11)
        RETURNING {}
        "#,
        DELIVERY_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(new.order_id)
    .bind(new.amount)
    .bind(new.sequence)
    .bind(new.transaction_date)
    .bind(new.mode)
    .bind(new.reason)
    .bind(new.memo)
    .bind(Json(new.quantities))
    .bind(new.idempotency_key)
    .bind(new.created_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some(constraint) if constraint == "uq_deliveries_order_sequence" => AppError::Conflict {
            resource: "delivery_sequence".to_string(),
            message: format!(
                "Delivery #{} was recorded concurrently; resubmit to continue",
                new.sequence
            ),
        },
        Some(_) => AppError::Conflict {
            resource: "idempotency_key".to_string(),
            message: "A delivery with this idempotency key already exists".to_string(),
        },
        None => AppError::DatabaseError(e),
    })?;

    Ok(row.into())
}

async fn find_by_idempotency_key(
    conn: &mut PgConnection,
    order_id: Uuid,
    key: &str,
) -> AppResult<Option<Delivery>> {
    let row = sqlx::query_as::<_, DeliveryRow>(&format!(
        "SELECT {} FROM deliveries WHERE order_id = $1 AND idempotency_key = $2",
        DELIVERY_COLUMNS
    ))
    .bind(order_id)
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Into::into))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shared::DeliveryMode;

    fn submission(amount: i64, key: &str) -> NormalizedDelivery {
        NormalizedDelivery {
            amount: Decimal::from(amount),
            mode: DeliveryMode::AmountOnly,
            quantities: Vec::new(),
            scheduled_date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            reason: None,
            memo: None,
            idempotency_key: Some(key.to_string()),
            settles_order: false,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_second_click_with_new_key_is_duplicate() {
        let now = Utc::now();
        let first = RecentDelivery {
            id: Uuid::new_v4(),
            delivery_sequence: 1,
            amount: Decimal::from(250),
            created_at: now - Duration::seconds(1),
        };

        let recent = [first.clone()];
        let policy = DuplicatePolicy::default();
        let err = guard_duplicate(&recent, &submission(250, "click-2"), now, &policy).unwrap_err();
        match err {
            AppError::DuplicateSubmission {
                existing_id,
                sequence,
                ..
            } => {
                assert_eq!(existing_id, first.id);
                assert_eq!(sequence, 1);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn test_different_amount_passes_guard() {
        let now = Utc::now();
        let first = RecentDelivery {
            id: Uuid::new_v4(),
            delivery_sequence: 1,
            amount: Decimal::from(250),
            created_at: now - Duration::seconds(1),
        };
        let policy = DuplicatePolicy::default();
        assert!(guard_duplicate(&[first], &submission(900, "click-2"), now, &policy).is_ok());
    }
}
