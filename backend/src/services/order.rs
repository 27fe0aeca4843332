//! Purchase order service: order creation and ledger-derived order state

use std::collections::HashSet;

use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{unique_violation, AppError, AppResult};
use crate::models::{
    CreateOrderInput, ItemBalanceView, OrderBalanceView, OrderItemRow, OrderRow, PurchaseOrder,
    PurchaseOrderItem, ORDER_COLUMNS, ORDER_ITEM_COLUMNS,
};
use shared::{validate_order_items, ItemState, OrderSnapshot};

/// Purchase order service
#[derive(Clone)]
pub struct OrderService {
    db: PgPool,
}

/// Item row joined with its delivered quantity and product stock
#[derive(Debug, FromRow)]
struct ItemStateRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    quantity: Decimal,
    unit_price: Decimal,
    total_amount: Decimal,
    moved_quantity: Decimal,
    pending_quantity: Decimal,
    product_stock: Decimal,
}

impl From<ItemStateRow> for ItemState {
    fn from(row: ItemStateRow) -> Self {
        ItemState {
            item: PurchaseOrderItem {
                id: row.id,
                order_id: row.order_id,
                product_id: row.product_id,
                quantity: row.quantity,
                unit_price: row.unit_price,
                total_amount: row.total_amount,
            },
            delivered_quantity: row.moved_quantity + row.pending_quantity,
            product_stock: row.product_stock,
        }
    }
}

/// Re-derive an order's state from the ledger.
///
/// With `lock` the order row is held `FOR UPDATE` until the caller's transaction ends, which
/// serializes delivery submissions per order. Delivered quantities count `in` movements of
/// confirmed deliveries plus the requested quantities of confirmed deliveries that are not
/// allocated yet, so a pending allocation still reserves its quantities.
pub async fn load_snapshot(
    conn: &mut PgConnection,
    order_id: Uuid,
    lock: bool,
) -> AppResult<OrderSnapshot> {
    let order_sql = format!(
        "SELECT {} FROM purchase_orders WHERE id = $1{}",
        ORDER_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    );
    let order: PurchaseOrder = sqlx::query_as::<_, OrderRow>(&order_sql)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))?
        .into();

    let items = sqlx::query_as::<_, ItemStateRow>(
        r#"
        SELECT i.id, i.order_id, i.product_id, i.quantity, i.unit_price, i.total_amount,
               COALESCE((
                   SELECT SUM(m.quantity)
                   FROM inventory_movements m
                   JOIN deliveries d ON d.id = m.delivery_id
                   WHERE m.order_item_id = i.id
                     AND m.movement_type = 'in'
                     AND d.status = 'confirmed'
               ), 0) AS moved_quantity,
               COALESCE((
                   SELECT SUM((q->>'quantity')::numeric)
                   FROM deliveries d
                   CROSS JOIN LATERAL jsonb_array_elements(d.requested_quantities) q
                   WHERE d.order_id = i.order_id
                     AND d.status = 'confirmed'
                     AND d.allocated_at IS NULL
                     AND d.mode <> 'amount_only'
                     AND (q->>'item_id')::uuid = i.id
               ), 0) AS pending_quantity,
               p.current_stock AS product_stock
        FROM purchase_order_items i
        JOIN products p ON p.id = i.product_id
        WHERE i.order_id = $1
        ORDER BY i.created_at, i.id
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    let (delivered_amount, confirmed_deliveries) = sqlx::query_as::<_, (Decimal, i64)>(
        r#"
        SELECT COALESCE(SUM(total_amount), 0), COUNT(*)
        FROM deliveries
        WHERE order_id = $1 AND status = 'confirmed'
        "#,
    )
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(OrderSnapshot {
        order,
        items: items.into_iter().map(Into::into).collect(),
        delivered_amount,
        confirmed_deliveries: confirmed_deliveries.max(0) as usize,
    })
}

/// Items of an order in creation order
pub async fn load_items(conn: &mut PgConnection, order_id: Uuid) -> AppResult<Vec<PurchaseOrderItem>> {
    let rows = sqlx::query_as::<_, OrderItemRow>(&format!(
        "SELECT {} FROM purchase_order_items WHERE order_id = $1 ORDER BY created_at, id",
        ORDER_ITEM_COLUMNS
    ))
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Balance view of a snapshot, as returned by the API
pub fn balance_view(snapshot: OrderSnapshot) -> OrderBalanceView {
    let derived_remaining_amount = snapshot.remaining_amount();
    let cache_in_sync = snapshot.cache_in_sync();
    let delivery_count = snapshot.confirmed_deliveries as i64;
    let items = snapshot
        .items
        .into_iter()
        .map(|state| {
            let remaining_quantity = state.remaining_quantity();
            ItemBalanceView {
                item: state.item,
                delivered_quantity: state.delivered_quantity,
                remaining_quantity,
            }
        })
        .collect();

    OrderBalanceView {
        order: snapshot.order,
        delivered_amount: snapshot.delivered_amount,
        derived_remaining_amount,
        cache_in_sync,
        delivery_count,
        items,
    }
}

impl OrderService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create an order together with its items.
    ///
    /// The order total is the sum of the item totals and never changes afterwards.
    pub async fn create_order(&self, input: CreateOrderInput) -> AppResult<OrderBalanceView> {
        input.validate()?;
        validate_order_items(&input.items).map_err(|msg| AppError::Validation {
            field: "items".to_string(),
            message: msg.to_string(),
        })?;

        let product_ids: Vec<Uuid> = input
            .items
            .iter()
            .map(|i| i.product_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let known = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products WHERE id = ANY($1)")
            .bind(&product_ids)
            .fetch_one(&self.db)
            .await?;
        if known != product_ids.len() as i64 {
            return Err(AppError::Validation {
                field: "items".to_string(),
                message: "One or more products do not exist".to_string(),
            });
        }

        let line_totals: Vec<Decimal> = input
            .items
            .iter()
            .map(|i| (i.quantity * i.unit_price).round_dp(2))
            .collect();
        let total_amount: Decimal = line_totals.iter().copied().sum();

        let mut tx = self.db.begin().await?;

        let order_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO purchase_orders (order_number, partner_name, total_amount, remaining_amount,
                                         delivery_deadline, status)
            VALUES ($1, $2, $3, $3, $4, 'undelivered')
            RETURNING id
            "#,
        )
        .bind(input.order_number.trim())
        .bind(input.partner_name.trim())
        .bind(total_amount)
        .bind(input.delivery_deadline)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => AppError::DuplicateEntry("order_number".to_string()),
            None => AppError::DatabaseError(e),
        })?;

        for (item, line_total) in input.items.iter().zip(&line_totals) {
            sqlx::query(
                r#"
                INSERT INTO purchase_order_items (order_id, product_id, quantity, unit_price, total_amount)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(line_total)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            order_id = %order_id,
            order_number = %input.order_number,
            total_amount = %total_amount,
            items = input.items.len(),
            "Purchase order created"
        );

        self.get_order(order_id).await
    }

    /// Order with balances re-derived from the ledger
    pub async fn get_order(&self, order_id: Uuid) -> AppResult<OrderBalanceView> {
        let mut conn = self.db.acquire().await?;
        let snapshot = load_snapshot(&mut conn, order_id, false).await?;
        Ok(balance_view(snapshot))
    }
}
