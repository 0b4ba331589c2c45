// [apps/orchestrator/src/handlers/governance.rs]
//! `GET /governance/collisions?status=`; `POST .../resolve|reopen`.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::body::Bytes;
use axum::Json;
use serde::Deserialize;

use crate::auth::{CallerPrincipal, Role};
use crate::error::ApiError;
use crate::middleware::{content_type, require_role};
use crate::services::{approval_gate, governance};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<impl IntoResponse, ApiError> {
    // Rows are stored uppercase (`OPEN`/`RESOLVED`); the query param per
    // spec §6 arrives lowercase, so normalize before it reaches the filter.
    let status = query.status.filter(|s| s != "all").map(|s| s.to_ascii_uppercase());
    Ok(Json(governance::list(&state, status.as_deref()).await?))
}

#[derive(Debug, Deserialize, Default)]
pub struct ResolveBody {
    note: Option<String>,
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;
    let note = if body.is_empty() { None } else { serde_json::from_slice::<ResolveBody>(&body).map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?.note };

    let tx = approval_gate::begin(
        &state,
        &principal.map(|p| p.principal).unwrap_or_default(),
        "POST",
        &format!("/governance/collisions/{id}/resolve"),
        &body,
        content_type(&headers),
        headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok()),
    )
    .await?;

    let collision = governance::resolve_tx(&tx, &state, &id, note.as_deref()).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(collision))
}

pub async fn reopen(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;

    let tx = approval_gate::begin(
        &state,
        &principal.map(|p| p.principal).unwrap_or_default(),
        "POST",
        &format!("/governance/collisions/{id}/reopen"),
        &[],
        None,
        headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok()),
    )
    .await?;

    let collision = governance::reopen_tx(&tx, &state, &id).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(collision))
}
