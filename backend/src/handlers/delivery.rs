//! HTTP handlers for delivery submission and allocation

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Delivery, DeliveryOutcome, DeliveryRequest};
use crate::services::delivery::DeliveryDetail;
use crate::services::DeliveryService;
use crate::AppState;

/// Submit a delivery against an order.
///
/// 201 for a new delivery, 200 when an idempotency key replays an earlier one.
pub async fn submit_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<DeliveryRequest>,
) -> AppResult<impl IntoResponse> {
    let service = DeliveryService::new(state.db, &state.config);
    let outcome = service.submit(order_id, request).await?;
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// Delivery history of an order
pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Vec<Delivery>>> {
    let service = DeliveryService::new(state.db, &state.config);
    let deliveries = service.list_deliveries(order_id).await?;
    Ok(Json(deliveries))
}

/// A delivery with its movements and allocations
pub async fn get_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
) -> AppResult<Json<DeliveryDetail>> {
    let service = DeliveryService::new(state.db, &state.config);
    let detail = service.get_delivery(delivery_id).await?;
    Ok(Json(detail))
}

/// Retry allocation for a delivery stuck in the recorded state
pub async fn allocate_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
) -> AppResult<Json<DeliveryOutcome>> {
    let service = DeliveryService::new(state.db, &state.config);
    let outcome = service.retry_allocation(delivery_id).await?;
    Ok(Json(outcome))
}
