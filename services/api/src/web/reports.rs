//! services/api/src/web/reports.rs
//!
//! Weekly parent report endpoint.

use crate::web::{
    rest::{owned_child, port_error, HandlerError},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use chrono::{DateTime, Utc};
use companion_core::{domain::WeeklyReport, report::refresh_weekly_report};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, ToSchema)]
pub struct WeeklyReportResponse {
    child_id: Uuid,
    /// ISO week, e.g. `2026-W42`.
    week: String,
    summary: String,
    highlights: Vec<String>,
    suggestions: Vec<String>,
    sessions_considered: u32,
    generated_at: DateTime<Utc>,
}

impl From<WeeklyReport> for WeeklyReportResponse {
    fn from(report: WeeklyReport) -> Self {
        Self {
            child_id: report.child_id,
            week: report.week.to_string(),
            summary: report.summary,
            highlights: report.highlights,
            suggestions: report.suggestions,
            sessions_considered: report.sessions_considered,
            generated_at: report.generated_at,
        }
    }
}

/// This week's report for a child. Served from cache until ten more sessions have happened.
#[utoipa::path(
    get,
    path = "/children/{child_id}/weekly-report",
    params(("child_id" = Uuid, Path, description = "The child's id")),
    responses(
        (status = 200, description = "The current week's report", body = WeeklyReportResponse),
        (status = 404, description = "Child not found"),
        (status = 500, description = "Report generation failed")
    )
)]
pub async fn weekly_report_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(child_id): Path<Uuid>,
) -> Result<Json<WeeklyReportResponse>, HandlerError> {
    let child = owned_child(&app_state, user_id, child_id).await?;
    let report = refresh_weekly_report(
        app_state.db.as_ref(),
        app_state.report_adapter.as_ref(),
        &child,
        Utc::now(),
    )
    .await
    .map_err(|e| port_error("Weekly report", e))?;
    info!("Serving weekly report {} for child {}", report.week, child.id);
    Ok(Json(WeeklyReportResponse::from(report)))
}
