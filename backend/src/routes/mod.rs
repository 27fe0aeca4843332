//! Route definitions for the Purchase Ledger

use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .nest("/products", product_routes())
        .nest("/orders", order_routes())
        .nest("/deliveries", delivery_routes())
        // Audit and repair
        .route("/integrity/report", get(handlers::get_integrity_report))
        .nest("/corrections", correction_routes())
}

/// Product catalogue routes
fn product_routes() -> Router<AppState> {
    Router::new().route(
        "/",
        get(handlers::list_products).post(handlers::create_product),
    )
}

/// Purchase order routes
fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_order))
        .route("/:order_id", get(handlers::get_order))
        .route(
            "/:order_id/deliveries",
            get(handlers::list_deliveries).post(handlers::submit_delivery),
        )
}

/// Delivery routes
fn delivery_routes() -> Router<AppState> {
    Router::new()
        .route("/:delivery_id", get(handlers::get_delivery))
        .route("/:delivery_id/allocate", post(handlers::allocate_delivery))
}

/// Correction routes
fn correction_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::run_correction))
        .route("/backups", get(handlers::list_backups))
}
