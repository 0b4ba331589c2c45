// [apps/orchestrator/src/handlers/cis.rs]
//! Read-mostly CI surface (viewer scope) plus the one operator mutation,
//! drift resolution. Filtering is delegated to `CiRepository::list_filtered`
//! (status/source/owner); `q` narrows the result in-memory by substring
//! match on `name` since there is no free-text index in the schema.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::body::Bytes;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{CallerPrincipal, Role};
use crate::error::ApiError;
use crate::middleware::{content_type, require_role};
use crate::services::{approval_gate, drift};
use crate::state::AppState;
use cmdb_infra_db::repositories::{AuditRepository, CiRepository, IdentityRepository, RelationshipRepository};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    source: Option<String>,
    owner: Option<String>,
    q: Option<String>,
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let mut cis = CiRepository::list_filtered(&connection, query.status.as_deref(), query.source.as_deref(), query.owner.as_deref()).await?;
    if let Some(needle) = query.q.as_deref() {
        let needle = needle.to_ascii_lowercase();
        cis.retain(|ci| ci.name.to_ascii_lowercase().contains(&needle));
    }
    Ok(Json(cis))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let ci = CiRepository::find_by_id(&connection, &id).await?.ok_or_else(|| ApiError::NotFound(format!("ci {id} not found")))?;
    Ok(Json(ci))
}

pub async fn graph(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let ci = CiRepository::find_by_id(&connection, &id).await?.ok_or_else(|| ApiError::NotFound(format!("ci {id} not found")))?;
    let relationships = RelationshipRepository::list_for_ci(&connection, &id).await?;
    Ok(Json(json!({"ci": ci, "relationships": relationships})))
}

pub async fn audit(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    CiRepository::find_by_id(&connection, &id).await?.ok_or_else(|| ApiError::NotFound(format!("ci {id} not found")))?;
    let events = AuditRepository::list_for_ci(&connection, &id).await?;
    Ok(Json(events))
}

pub async fn identities(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    CiRepository::find_by_id(&connection, &id).await?.ok_or_else(|| ApiError::NotFound(format!("ci {id} not found")))?;
    let identities = IdentityRepository::list_for_ci(&connection, &id).await?;
    Ok(Json(identities))
}

pub async fn detail(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let ci = CiRepository::find_by_id(&connection, &id).await?.ok_or_else(|| ApiError::NotFound(format!("ci {id} not found")))?;
    let identities = IdentityRepository::list_for_ci(&connection, &id).await?;
    let relationships = RelationshipRepository::list_for_ci(&connection, &id).await?;
    let recent_audit = AuditRepository::list_for_ci(&connection, &id).await?.into_iter().take(20).collect::<Vec<_>>();
    Ok(Json(json!({"ci": ci, "identities": identities, "relationships": relationships, "recent_audit": recent_audit})))
}

pub async fn drift_report(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(drift::detect(&state, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct DriftResolveBody {
    source: String,
    #[serde(default)]
    fields: Vec<String>,
}

pub async fn drift_resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;
    let parsed: DriftResolveBody = serde_json::from_slice(&body).map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;

    let tx = approval_gate::begin(
        &state,
        &principal.map(|p| p.principal).unwrap_or_default(),
        "POST",
        &format!("/cis/{id}/drift/resolve"),
        &body,
        content_type(&headers),
        headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok()),
    )
    .await?;

    let report = drift::detect(&state, &id).await?;
    let resolved = drift::resolve_tx(&tx, &state, &id, &parsed.source, &parsed.fields, &report).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(resolved))
}

pub async fn pickers(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let mut cis = CiRepository::list_filtered(&connection, query.status.as_deref(), query.source.as_deref(), query.owner.as_deref()).await?;
    if let Some(needle) = query.q.as_deref() {
        let needle = needle.to_ascii_lowercase();
        cis.retain(|ci| ci.name.to_ascii_lowercase().contains(&needle));
    }
    let options: Vec<_> = cis.into_iter().map(|ci| json!({"id": ci.id, "name": ci.name, "ci_type": ci.ci_type})).collect();
    Ok(Json(options))
}
