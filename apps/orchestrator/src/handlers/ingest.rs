// [apps/orchestrator/src/handlers/ingest.rs]
//! C4 bulk ingest surface: `POST /ingest/cis:bulk` and
//! `POST /ingest/relationships:bulk`. Uses `axum::body::Bytes` instead of
//! `axum::Json` so the same byte buffer serves both our own
//! `serde_json::from_slice` parsing and the approval gate's
//! `hash_request_body` — the request is hashed exactly as the wire sent it.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json_};

use crate::auth::{CallerPrincipal, Role};
use crate::error::ApiError;
use crate::middleware::{content_type, require_role};
use crate::services::reconciler::{self, IngestCiPayload};
use crate::services::{approval_gate, integration_publisher, relationships};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct CiBulkBody {
    source: String,
    #[serde(alias = "items")]
    cis: Vec<IngestCiPayload>,
}

#[derive(Debug, Deserialize)]
struct RelationshipItem {
    source_ci_id: String,
    target_ci_id: String,
    relation_type: String,
}

#[derive(Debug, Deserialize)]
struct RelationshipBulkBody {
    source: String,
    #[serde(alias = "items")]
    relationships: Vec<RelationshipItem>,
}

#[derive(Debug, Deserialize)]
pub struct BulkQuery {
    #[serde(rename = "dryRun", default)]
    dry_run: bool,
}

#[derive(Debug, Default, Serialize)]
struct BulkResult {
    created: u32,
    updated: u32,
    collisions: u32,
    staged: u32,
    errors: Vec<Json_>,
}

pub async fn bulk_cis(
    State(state): State<AppState>,
    Query(query): Query<BulkQuery>,
    headers: HeaderMap,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;

    let parsed: CiBulkBody = serde_json::from_slice(&body).map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;
    if parsed.cis.len() > state.config.max_bulk_items {
        return Err(ApiError::Validation(format!("payload exceeds max_bulk_items ({})", state.config.max_bulk_items)));
    }

    let caller = principal.as_ref().map(|p| p.principal.clone()).unwrap_or_default();
    let tx = approval_gate::begin(&state, &caller, "POST", "/ingest/cis:bulk", &body, content_type(&headers), headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok())).await?;

    let mut result = BulkResult::default();
    let mut pending_events: Vec<(&'static str, cmdb_infra_db::models::Ci)> = Vec::new();
    let mut pending_notifications: Vec<(String, Json_)> = Vec::new();
    for (index, item) in parsed.cis.iter().enumerate() {
        if query.dry_run {
            result.staged += 1;
            continue;
        }
        match reconciler::reconcile_tx(&tx, &state, &parsed.source, item).await {
            Ok(mut outcome) => {
                if outcome.created {
                    result.created += 1;
                } else if outcome.updated {
                    result.updated += 1;
                }
                result.collisions += outcome.collision_count;
                pending_notifications.append(&mut outcome.pending_notifications);
                pending_events.push((if outcome.created { "ci.created" } else { "ci.updated" }, outcome.ci));
            }
            Err(err) => result.errors.push(json!({"index": index, "error": err.to_string()})),
        }
    }
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;

    reconciler::notify_pending(&state, &pending_notifications);
    for (event, ci) in &pending_events {
        integration_publisher::publish_ci_event(&state, event, ci).await;
    }

    Ok(Json(result))
}

pub async fn bulk_relationships(
    State(state): State<AppState>,
    Query(query): Query<BulkQuery>,
    headers: HeaderMap,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;

    let parsed: RelationshipBulkBody = serde_json::from_slice(&body).map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;
    if parsed.relationships.len() > state.config.max_bulk_items {
        return Err(ApiError::Validation(format!("payload exceeds max_bulk_items ({})", state.config.max_bulk_items)));
    }

    let caller = principal.as_ref().map(|p| p.principal.clone()).unwrap_or_default();
    let tx = approval_gate::begin(&state, &caller, "POST", "/ingest/relationships:bulk", &body, content_type(&headers), headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok())).await?;

    let mut result = BulkResult::default();
    let mut pending_events = Vec::new();
    for (index, item) in parsed.relationships.iter().enumerate() {
        if query.dry_run {
            result.staged += 1;
            continue;
        }
        match relationships::create_tx(&tx, &state, &item.source_ci_id, &item.target_ci_id, &item.relation_type, &parsed.source).await {
            Ok(relationship) => {
                result.created += 1;
                pending_events.push(relationship);
            }
            Err(err) => result.errors.push(json!({"index": index, "error": err.to_string()})),
        }
    }
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;

    for relationship in &pending_events {
        integration_publisher::publish_relationship_event(&state, relationship).await;
    }

    Ok(Json(result))
}
