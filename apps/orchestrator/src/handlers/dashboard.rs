// [apps/orchestrator/src/handlers/dashboard.rs]
//! C14 dashboard surface: `GET /dashboard/{me,summary,activity,alerts}`,
//! all viewer scope. Thin aggregation over existing repositories/services —
//! no new persistence.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::auth::CallerPrincipal;
use crate::error::ApiError;
use crate::state::AppState;
use cmdb_infra_db::models::JobStatus;
use cmdb_infra_db::repositories::{AuditRepository, CiRepository, CollisionRepository, SyncJobRepository};

pub async fn me(principal: Option<axum::extract::Extension<CallerPrincipal>>) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0).ok_or(ApiError::Unauthorized)?;
    Ok(Json(json!({"principal": principal.principal, "role": principal.role.as_str()})))
}

pub async fn summary(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let total_cis = CiRepository::count(&connection).await?;
    let open_collisions = CollisionRepository::list(&connection, Some("OPEN")).await?.len();
    let recent_jobs = SyncJobRepository::list_recent(&connection, 200).await?;
    let jobs_in_flight = recent_jobs.iter().filter(|j| matches!(j.status, JobStatus::Queued | JobStatus::Running)).count();
    let jobs_failed = recent_jobs.iter().filter(|j| matches!(j.status, JobStatus::Failed)).count();

    Ok(Json(json!({
        "total_cis": total_cis,
        "open_collisions": open_collisions,
        "jobs_in_flight": jobs_in_flight,
        "jobs_failed_recent": jobs_failed,
    })))
}

pub async fn activity(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let events = AuditRepository::export_recent(&connection, 50).await?;
    Ok(Json(events))
}

pub async fn alerts(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.telemetry.snapshot(state.now()))
}
