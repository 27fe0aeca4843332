//! HTTP handlers for correction runs

use axum::{
    extract::{Query, State},
    Json,
};

use crate::error::AppResult;
use crate::models::{BackupSummary, CorrectionReport, CorrectionRequest};
use crate::services::CorrectionService;
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

/// Run a correction; `{"category": null}` fixes everything
pub async fn run_correction(
    State(state): State<AppState>,
    Json(request): Json<CorrectionRequest>,
) -> AppResult<Json<CorrectionReport>> {
    let service = CorrectionService::new(state.db, &state.config);
    let report = service.run(request).await?;
    Ok(Json(report))
}

/// Restore points, newest first
pub async fn list_backups(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<BackupSummary>>> {
    let service = CorrectionService::new(state.db, &state.config);
    let backups = service.list_backups(pagination).await?;
    Ok(Json(backups))
}
