//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::services::IntegrityService;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<serde_json::Value>,
}

/// Health check endpoint handler
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // Check database connectivity
    let connected = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();

    let diagnostics = if connected {
        IntegrityService::new(state.db.clone(), &state.config)
            .diagnostics()
            .await
    } else {
        None
    };

    Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if connected { "connected" } else { "disconnected" }.to_string(),
        diagnostics,
    })
}
