// [apps/orchestrator/src/handlers/integrations.rs]
//! `/integrations/*` — job queue inspection/enqueue (C8), NetBox pull and
//! watermark inspection (C7), Backstage entity preview and sync trigger.
//! Scope "varies" per spec §6: reads are viewer, every POST is operator.

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
use crate::services::{approval_gate, backstage, netbox, queue};
use crate::state::AppState;
use cmdb_infra_db::repositories::{CiRepository, SyncJobRepository, SyncStateRepository};

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "sync_scheduler_enabled": state.config.sync_scheduler_enabled,
        "netbox_sync_enabled": state.config.netbox_sync_enabled,
        "backstage_sync_enabled": state.config.backstage_sync_enabled,
    }))
}

pub async fn list_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    Ok(Json(SyncJobRepository::list_recent(&connection, 200).await?))
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let job = SyncJobRepository::find_by_id(&connection, &id).await?.ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueJobBody {
    job_type: String,
    #[serde(default = "serde_json::Value::default")]
    payload: serde_json::Value,
    #[serde(default = "default_max_attempts")]
    max_attempts: i64,
}

fn default_max_attempts() -> i64 {
    3
}

pub async fn enqueue_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_caller(principal)?;
    let parsed: EnqueueJobBody = serde_json::from_slice(&body).map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;

    let tx = approval_gate::begin(
        &state,
        &principal.principal,
        "POST",
        "/integrations/jobs",
        &body,
        content_type(&headers),
        headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok()),
    )
    .await?;

    let job = queue::enqueue_tx(&tx, &state, &parsed.job_type, &principal.principal, parsed.payload, parsed.max_attempts).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(job))
}

fn require_caller(principal: Option<axum::extract::Extension<CallerPrincipal>>) -> Result<CallerPrincipal, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;
    principal.ok_or(ApiError::Unauthorized)
}

#[derive(Debug, Deserialize)]
pub struct NetboxPullQuery {
    #[serde(default = "default_pull_limit")]
    limit: usize,
    #[serde(rename = "dryRun", default)]
    dry_run: bool,
}

fn default_pull_limit() -> usize {
    100
}

pub async fn netbox_import(
    State(state): State<AppState>,
    Query(query): Query<NetboxPullQuery>,
    headers: HeaderMap,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;

    // The pull itself walks paginated upstream HTTP responses interleaved
    // with per-record reconciliation, so it is not folded into the gate's
    // transaction (that would hold a DB transaction open across outbound
    // HTTP round-trips). The gate's consume only commits once the pull has
    // returned, so a hard failure before any record is touched leaves the
    // approval APPROVED rather than spent.
    let tx = approval_gate::begin(
        &state,
        &principal.map(|p| p.principal).unwrap_or_default(),
        "POST",
        "/integrations/netbox/import",
        &[],
        None,
        headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok()),
    )
    .await?;

    let devices = netbox::pull_devices(&state, query.limit, query.dry_run).await?;
    let vms = netbox::pull_virtual_machines(&state, query.limit, query.dry_run).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({"devices": devices, "virtual_machines": vms})))
}

pub async fn netbox_export(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let cis = CiRepository::list_filtered(&connection, None, Some(netbox::SOURCE), None).await?;
    Ok(Json(cis))
}

pub async fn netbox_watermarks(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let devices = SyncStateRepository::get(&connection, "netbox.import.devices.last_updated").await?;
    let vms = SyncStateRepository::get(&connection, "netbox.import.vms.last_updated").await?;
    Ok(Json(json!({"devices_last_updated": devices, "virtual_machines_last_updated": vms})))
}

pub async fn backstage_entities(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let connection = state.store.connection()?;
    let cis = CiRepository::list_filtered(&connection, None, None, None).await?;
    let entities: Vec<_> = cis.iter().map(|ci| backstage::translate_ci_event("ci.snapshot", ci)).collect();
    Ok(Json(entities))
}

pub async fn backstage_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    principal: Option<axum::extract::Extension<CallerPrincipal>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_caller(principal)?;

    let tx = approval_gate::begin(
        &state,
        &principal.principal,
        "POST",
        "/integrations/backstage/sync",
        &[],
        None,
        headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok()),
    )
    .await?;

    let job = queue::enqueue_tx(&tx, &state, queue::JOB_BACKSTAGE_SYNC, &principal.principal, json!({}), 3).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(job))
}
