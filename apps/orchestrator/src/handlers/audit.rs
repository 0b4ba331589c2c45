// [apps/orchestrator/src/handlers/audit.rs]
//! `GET /audit/export?limit` — NDJSON dump, most recent first, operator scope.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::auth::{CallerPrincipal, Role};
use crate::error::ApiError;
use crate::middleware::require_role;
use crate::state::AppState;
use cmdb_infra_db::repositories::AuditRepository;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    1000
}

pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(principal.map(|p| p.0).as_ref(), Role::Operator)?;
    let connection = state.store.connection()?;
    let events = AuditRepository::export_recent(&connection, query.limit).await?;

    let mut body = String::new();
    for event in &events {
        body.push_str(&serde_json::to_string(event).map_err(|e| ApiError::Internal(e.to_string()))?);
        body.push('\n');
    }

    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], body))
}
