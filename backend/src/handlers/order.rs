//! HTTP handlers for purchase orders

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{CreateOrderInput, OrderBalanceView};
use crate::services::OrderService;
use crate::AppState;

/// Create a purchase order with its items
pub async fn create_order(
    State(state): State<AppState>,
    Json(input): Json<CreateOrderInput>,
) -> AppResult<impl IntoResponse> {
    let service = OrderService::new(state.db);
    let order = service.create_order(input).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Get an order with balances re-derived from the ledger
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<OrderBalanceView>> {
    let service = OrderService::new(state.db);
    let order = service.get_order(order_id).await?;
    Ok(Json(order))
}
