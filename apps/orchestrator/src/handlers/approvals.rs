// [apps/orchestrator/src/handlers/approvals.rs]
//! `GET/POST /approvals`, `POST /approvals/{id}/approve|reject` — C11 surface.
//! Creation is operator scope; decisions require approver scope (enforced by
//! `services::approval_gate::decide` via the self-approval-ban check, and
//! here additionally by role).

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value as Json_;

use crate::auth::{CallerPrincipal, Role};
use crate::error::ApiError;
use crate::middleware::require_role;
use crate::services::approval_gate;
use crate::state::AppState;
use cmdb_infra_db::repositories::ApprovalRepository;

pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    Ok(Json(ApprovalRepository::list(&connection, 200).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    method: String,
    path: String,
    #[serde(default = "Json_::default")]
    payload: Json_,
    #[serde(default)]
    reason: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
    Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;
    let principal = principal.ok_or(ApiError::Unauthorized)?;

    if !body.path.starts_with('/') || body.path.starts_with("/approvals") {
        return Err(ApiError::Validation("path must start with '/' and not target /approvals".into()));
    }

    let hash = approval_gate::canonical_payload_hash(Some(&body.payload));
    let approval = approval_gate::create(&state, &body.method, &body.path, &hash, &body.payload, body.reason.as_deref(), &principal.principal).await?;
    Ok(Json(approval))
}

#[derive(Debug, Deserialize, Default)]
pub struct DecisionBody {
    note: Option<String>,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
    body: Option<Json<DecisionBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Approver)?;
    let principal = principal.ok_or(ApiError::Unauthorized)?;
    let note = body.and_then(|b| b.0.note);

    Ok(Json(approval_gate::decide(&state, &id, true, &principal.principal, note.as_deref()).await?))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
    body: Option<Json<DecisionBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Approver)?;
    let principal = principal.ok_or(ApiError::Unauthorized)?;
    let note = body.and_then(|b| b.0.note);

    Ok(Json(approval_gate::decide(&state, &id, false, &principal.principal, note.as_deref()).await?))
}
