//! HTTP handlers for the integrity audit

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::services::integrity::export_to_csv;
use crate::services::IntegrityService;
use crate::AppState;

#[derive(Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>, // "json" or "csv"
}

/// Run every integrity check
pub async fn get_integrity_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> AppResult<impl IntoResponse> {
    let service = IntegrityService::new(state.db, &state.config);
    let report = service.run_all().await;

    if query.format.as_deref() == Some("csv") {
        let csv = export_to_csv(&report.results)?;
        Ok((
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"integrity_report.csv\"",
                ),
            ],
            csv,
        )
            .into_response())
    } else {
        Ok(Json(report).into_response())
    }
}
