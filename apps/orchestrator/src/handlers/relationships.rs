// [apps/orchestrator/src/handlers/relationships.rs]
//! `GET/POST/PATCH/DELETE /relationships[/{id}]` — viewer reads, operator
//! writes, thin over `services::relationships`. Writes take raw `Bytes`
//! rather than `axum::Json` so the approval gate (C11) can hash the body
//! exactly as the wire sent it before the handler parses it — same
//! rationale as `handlers::ingest`.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::body::Bytes;
use axum::Json;
use serde::Deserialize;

use crate::auth::{CallerPrincipal, Role};
use crate::error::ApiError;
use crate::middleware::{content_type, require_role};
use crate::services::{approval_gate, integration_publisher, relationships};
use crate::state::AppState;
use cmdb_infra_db::repositories::RelationshipRepository;

pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    Ok(Json(RelationshipRepository::list_all(&connection).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    source_ci_id: String,
    target_ci_id: String,
    relation_type: String,
    #[serde(default = "default_source")]
    source: String,
}

fn default_source() -> String {
    "manual".to_string()
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;
    let parsed: CreateBody = serde_json::from_slice(&body).map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;

    let tx = approval_gate::begin(
        &state,
        &principal.map(|p| p.principal).unwrap_or_default(),
        "POST",
        "/relationships",
        &body,
        content_type(&headers),
        headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok()),
    )
    .await?;

    let relationship = relationships::create_tx(&tx, &state, &parsed.source_ci_id, &parsed.target_ci_id, &parsed.relation_type, &parsed.source).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;

    integration_publisher::publish_relationship_event(&state, &relationship).await;
    Ok(Json(relationship))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    relation_type: String,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;
    let parsed: UpdateBody = serde_json::from_slice(&body).map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;

    let tx = approval_gate::begin(
        &state,
        &principal.map(|p| p.principal).unwrap_or_default(),
        "PATCH",
        &format!("/relationships/{id}"),
        &body,
        content_type(&headers),
        headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok()),
    )
    .await?;

    let relationship = relationships::update_tx(&tx, &state, &id, &parsed.relation_type).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(relationship))
}

pub async fn delete(
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
        "DELETE",
        &format!("/relationships/{id}"),
        &[],
        None,
        headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok()),
    )
    .await?;

    relationships::delete_tx(&tx, &state, &id).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
