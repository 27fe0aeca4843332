//! Correction engine: rewrites derived caches from the ledger.
//!
//! A run holds a session-level advisory lock, snapshots every table it may touch into
//! `correction_backups`, then runs each category in its own transaction. Updates are
//! guarded by the value that was read, so a row changed concurrently is left alone and
//! picked up by the next run.
//!
//! The session holding the lock is wrapped in [`LockedSession`]. If the run is dropped
//! before it unlocks, the connection is closed instead of returned to the pool, which ends
//! the session and frees the lock on the server.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::pool::PoolConnection;
use sqlx::{FromRow, PgConnection, PgPool, Postgres};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{
    BackupSummary, CategoryOutcome, CorrectionCategory, CorrectionReport, CorrectionRequest,
};
use crate::services::integrity::{load_order_balances, load_product_stock};
use shared::correction::{plan_order_total_fixes, plan_remaining_fixes, plan_stock_fixes};
use shared::{PaginatedResponse, Pagination, PaginationMeta};

#[derive(Clone)]
pub struct CorrectionService {
    db: PgPool,
    lock_key: i64,
}

#[derive(Debug, FromRow)]
struct BackupRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    categories: Vec<String>,
    tables: Vec<String>,
}

/// Distinct tables touched by the given categories, in first-use order
pub fn backup_tables(categories: &[CorrectionCategory]) -> Vec<&'static str> {
    let mut tables: Vec<&'static str> = Vec::new();
    for table in categories.iter().flat_map(|c| c.affected_tables().iter().copied()) {
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
    tables
}

/// A database session that can be taken out of its pool for good
pub trait Session: Send {
    fn discard(self);
}

impl Session for PoolConnection<Postgres> {
    fn discard(self) {
        drop(self.detach());
    }
}

/// Owns the session holding the correction lock until it is unlocked.
///
/// Dropped while armed, the session is discarded rather than pooled.
pub struct LockedSession<S: Session> {
    session: Option<S>,
}

impl<S: Session> LockedSession<S> {
    pub fn new(session: S) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    /// Hand the session back once it no longer holds the lock
    pub fn disarm(mut self) -> Option<S> {
        self.session.take()
    }
}

impl<S: Session> Drop for LockedSession<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::warn!("Correction run ended without unlocking; discarding its session");
            session.discard();
        }
    }
}

impl CorrectionService {
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            db,
            lock_key: config.correction.advisory_lock_key,
        }
    }

    /// Run one category, or all of them in dependency order
    pub async fn run(&self, request: CorrectionRequest) -> AppResult<CorrectionReport> {
        let categories = request.categories();

        let mut lock = LockedSession::new(self.db.acquire().await?);
        let acquired = match lock.session_mut() {
            Some(conn) => sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
                .bind(self.lock_key)
                .fetch_one(&mut **conn)
                .await?,
            None => false,
        };
        if !acquired {
            drop(lock.disarm());
            return Err(AppError::Conflict {
                resource: "correction".to_string(),
                message: "Another correction run is in progress".to_string(),
            });
        }

        let result = self.run_locked(&categories).await;
        self.release(lock).await;
        result
    }

    async fn run_locked(&self, categories: &[CorrectionCategory]) -> AppResult<CorrectionReport> {
        let (backup_id, backup_created_at) = self.create_backup(categories).await?;
        tracing::info!(
            backup_id = %backup_id,
            categories = ?categories.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            "Correction backup created"
        );

        let mut outcomes = Vec::with_capacity(categories.len());
        for &category in categories {
            let outcome = match self.fix(category).await {
                Ok(rows_fixed) => {
                    tracing::info!(category = category.as_str(), rows_fixed, "Correction applied");
                    CategoryOutcome {
                        category,
                        rows_fixed,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        category = category.as_str(),
                        backup_id = %backup_id,
                        error = %e,
                        "Correction failed"
                    );
                    CategoryOutcome {
                        category,
                        rows_fixed: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(CorrectionReport::new(backup_id, backup_created_at, outcomes))
    }

    async fn release(&self, mut lock: LockedSession<PoolConnection<Postgres>>) {
        let Some(conn) = lock.session_mut() else {
            return;
        };
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_key)
            .fetch_one(&mut **conn)
            .await;
        match released {
            Ok(_) => drop(lock.disarm()),
            // dropping the armed guard closes the session
            Err(e) => tracing::warn!(error = %e, "Advisory unlock failed; closing connection"),
        }
    }

    /// Snapshot affected tables as JSON; returns the backup id and timestamp
    async fn create_backup(
        &self,
        categories: &[CorrectionCategory],
    ) -> AppResult<(Uuid, DateTime<Utc>)> {
        let mut tx = self.db.begin().await?;

        let mut snapshot = Map::new();
        for table in backup_tables(categories) {
            let rows = sqlx::query_scalar::<_, Value>(&format!(
                "SELECT COALESCE(jsonb_agg(t), '[]'::jsonb) FROM {} t",
                table
            ))
            .fetch_one(&mut *tx)
            .await?;
            snapshot.insert(table.to_string(), rows);
        }

        let backup_id = Uuid::new_v4();
        let category_names: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
        let created_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            INSERT INTO correction_backups (id, categories, snapshot)
            VALUES ($1, $2, $3)
            RETURNING created_at
            "#,
        )
        .bind(backup_id)
        .bind(&category_names)
        .bind(Value::Object(snapshot))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((backup_id, created_at))
    }

    /// One category in its own transaction; returns rows changed
    async fn fix(&self, category: CorrectionCategory) -> AppResult<u64> {
        let mut tx = self.db.begin().await?;
        let rows_fixed = match category {
            CorrectionCategory::Financial => fix_order_totals(&mut tx).await?,
            CorrectionCategory::Delivery => fix_remaining_amounts(&mut tx).await?,
            CorrectionCategory::Inventory => fix_stock(&mut tx).await?,
        };
        tx.commit().await?;
        Ok(rows_fixed)
    }

    pub async fn list_backups(&self, pagination: Pagination) -> AppResult<PaginatedResponse<BackupSummary>> {
        let pagination = pagination.normalized();

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM correction_backups")
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, BackupRow>(
            r#"
            SELECT id, created_at, categories,
                   ARRAY(SELECT jsonb_object_keys(snapshot) ORDER BY 1) AS tables
            FROM correction_backups
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse {
            data: rows
                .into_iter()
                .map(|r| BackupSummary {
                    id: r.id,
                    created_at: r.created_at,
                    categories: r.categories,
                    tables: r.tables,
                })
                .collect(),
            pagination: PaginationMeta::new(&pagination, total.max(0) as u64),
        })
    }
}

async fn fix_order_totals(conn: &mut PgConnection) -> AppResult<u64> {
    let plan = plan_order_total_fixes(&load_order_balances(conn).await?);
    let mut fixed = 0;
    for fix in plan {
        fixed += sqlx::query(
            r#"
            UPDATE purchase_orders
            SET total_amount = $1, updated_at = NOW()
            WHERE id = $2 AND total_amount = $3
            "#,
        )
        .bind(fix.derived_total)
        .bind(fix.order_id)
        .bind(fix.stored_total)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }
    Ok(fixed)
}

async fn fix_remaining_amounts(conn: &mut PgConnection) -> AppResult<u64> {
    let plan = plan_remaining_fixes(&load_order_balances(conn).await?);
    let mut fixed = 0;
    for fix in plan {
        fixed += sqlx::query(
            r#"
            UPDATE purchase_orders
            SET remaining_amount = $1, status = $2, updated_at = NOW()
            WHERE id = $3 AND remaining_amount = $4 AND status = $5
            "#,
        )
        .bind(fix.derived_remaining)
        .bind(fix.derived_status.as_str())
        .bind(fix.order_id)
        .bind(fix.stored_remaining)
        .bind(fix.stored_status.as_str())
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }
    Ok(fixed)
}

async fn fix_stock(conn: &mut PgConnection) -> AppResult<u64> {
    let plan = plan_stock_fixes(&load_product_stock(conn).await?);
    let mut fixed = 0;
    for fix in plan {
        fixed += sqlx::query(
            r#"
            UPDATE products
            SET current_stock = $1, updated_at = NOW()
            WHERE id = $2 AND current_stock = $3
            "#,
        )
        .bind(fix.derived_stock)
        .bind(fix.product_id)
        .bind(fix.stored_stock)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }
    Ok(fixed)
}
