//! HTTP handlers for the product catalogue

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::error::AppResult;
use crate::models::{CreateProductInput, Product};
use crate::services::ProductService;
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

/// Create a product
pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProductInput>,
) -> AppResult<impl IntoResponse> {
    let service = ProductService::new(state.db);
    let product = service.create_product(input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// List products by code
pub async fn list_products(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<Product>>> {
    let service = ProductService::new(state.db);
    let products = service.list_products(pagination).await?;
    Ok(Json(products))
}
