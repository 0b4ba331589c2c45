// [apps/orchestrator/src/services/drift.rs]
//! C12: compares a CI against its NetBox/Backstage counterpart. Grounded
//! on `netbox.rs`'s HTTP-pull shape and `backstage.rs`'s entity
//! translation, read-only and single-CI instead of paged/bulk.

use crate::error::ApiError;
use crate::services::audit_log;
use crate::state::AppState;
use cmdb_infra_db::models::Ci;
use cmdb_infra_db::repositories::{CiRepository, IdentityRepository};
use libsql::Transaction;
use serde::Serialize;
use serde_json::{json, Value as Json};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Matched,
    Drift,
    Missing,
    Unavailable,
    Error,
    NotApplicable,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldMismatch {
    pub field: &'static str,
    pub cmdb_value: Json,
    pub external_value: Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: &'static str,
    pub status: SourceStatus,
    pub mismatches: Vec<FieldMismatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub ci_id: String,
    pub drift_detected: bool,
    pub sources: Vec<SourceReport>,
}

#[instrument(skip(state))]
pub async fn detect(state: &AppState, ci_id: &str) -> Result<DriftReport, ApiError> {
    let connection = state.store.connection()?;
    let ci = CiRepository::find_by_id(&connection, ci_id).await?.ok_or_else(|| ApiError::NotFound(format!("ci {ci_id} not found")))?;
    let identities = IdentityRepository::list_for_ci(&connection, ci_id).await?;

    let netbox = detect_netbox(state, &ci, &identities).await;
    let backstage = detect_backstage(state, &ci).await;

    let drift_detected = [&netbox, &backstage]
        .iter()
        .any(|r| matches!(r.status, SourceStatus::Drift | SourceStatus::Missing | SourceStatus::Error));

    Ok(DriftReport { ci_id: ci_id.to_string(), drift_detected, sources: vec![netbox, backstage] })
}

async fn detect_netbox(state: &AppState, ci: &Ci, identities: &[cmdb_infra_db::models::Identity]) -> SourceReport {
    let Some(base_url) = state.config.netbox_url.as_ref() else {
        return SourceReport { source: "netbox", status: SourceStatus::Unavailable, mismatches: Vec::new() };
    };

    let device_identity = identities.iter().find(|i| i.scheme == "netbox_device_id");
    let vm_identity = identities.iter().find(|i| i.scheme == "netbox_vm_id");
    let Some((path_segment, identity)) = device_identity
        .map(|i| ("dcim/devices", i))
        .or_else(|| vm_identity.map(|i| ("virtualization/virtual-machines", i)))
    else {
        return SourceReport { source: "netbox", status: SourceStatus::NotApplicable, mismatches: Vec::new() };
    };

    let url = format!("{}/{}/{}/", base_url.trim_end_matches('/'), path_segment, identity.value);
    let mut request = state.http_client.get(&url);
    if let Some(token) = &state.config.netbox_token {
        request = request.bearer_auth(token);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(_) => return SourceReport { source: "netbox", status: SourceStatus::Error, mismatches: Vec::new() },
    };

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return SourceReport { source: "netbox", status: SourceStatus::Missing, mismatches: Vec::new() };
    }
    if !response.status().is_success() {
        return SourceReport { source: "netbox", status: SourceStatus::Error, mismatches: Vec::new() };
    }

    let body: Json = match response.json().await {
        Ok(b) => b,
        Err(_) => return SourceReport { source: "netbox", status: SourceStatus::Error, mismatches: Vec::new() },
    };

    let remote_name = body.get("name").and_then(|v| v.as_str()).unwrap_or_default();
    if remote_name == ci.name {
        SourceReport { source: "netbox", status: SourceStatus::Matched, mismatches: Vec::new() }
    } else {
        SourceReport {
            source: "netbox",
            status: SourceStatus::Drift,
            mismatches: vec![FieldMismatch { field: "name", cmdb_value: json!(ci.name), external_value: json!(remote_name) }],
        }
    }
}

async fn detect_backstage(state: &AppState, ci: &Ci) -> SourceReport {
    let Some(base_url) = state.config.backstage_url.as_ref() else {
        return SourceReport { source: "backstage", status: SourceStatus::Unavailable, mismatches: Vec::new() };
    };

    let token = crate::services::backstage::resolve_bearer(state);
    let url = format!("{}/api/catalog/entities?filter=metadata.annotations.unifiedcmdb.io/ci-id={}", base_url.trim_end_matches('/'), ci.id);
    let mut request = state.http_client.get(&url);
    if let Some(token) = &token {
        request = request.bearer_auth(token);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(_) => return SourceReport { source: "backstage", status: SourceStatus::Error, mismatches: Vec::new() },
    };

    if !response.status().is_success() {
        return SourceReport { source: "backstage", status: SourceStatus::Error, mismatches: Vec::new() };
    }

    let body: Json = match response.json().await {
        Ok(b) => b,
        Err(_) => return SourceReport { source: "backstage", status: SourceStatus::Error, mismatches: Vec::new() },
    };

    let entities = body.as_array().cloned().unwrap_or_default();
    let Some(entity) = entities.first() else {
        return SourceReport { source: "backstage", status: SourceStatus::Missing, mismatches: Vec::new() };
    };

    let remote_name = entity.pointer("/metadata/name").and_then(|v| v.as_str()).unwrap_or_default();
    let remote_type = entity.pointer("/spec/type").and_then(|v| v.as_str()).unwrap_or_default();
    let remote_owner = entity.pointer("/spec/owner").and_then(|v| v.as_str());

    let mut mismatches = Vec::new();
    if remote_name != ci.name {
        mismatches.push(FieldMismatch { field: "name", cmdb_value: json!(ci.name), external_value: json!(remote_name) });
    }
    if remote_type != ci.ci_type {
        mismatches.push(FieldMismatch { field: "ci_type", cmdb_value: json!(ci.ci_type), external_value: json!(remote_type) });
    }
    if remote_owner != ci.owner.as_deref() {
        mismatches.push(FieldMismatch { field: "owner", cmdb_value: json!(ci.owner), external_value: json!(remote_owner) });
    }

    let status = if mismatches.is_empty() { SourceStatus::Matched } else { SourceStatus::Drift };
    SourceReport { source: "backstage", status, mismatches }
}

const RESOLVABLE_FIELDS: [&str; 3] = ["name", "ci_type", "owner"];

/// Applies incoming values from a prior [`detect`] snapshot to the CI for
/// the requested field subset. `source == "cmdb"` is a no-op that still
/// records intent, per spec §4.9. Runs on the caller's transaction, which
/// is also the approval gate's transaction — see [`approval_gate::begin`].
#[instrument(skip(tx, state, report))]
pub async fn resolve_tx(tx: &Transaction, state: &AppState, ci_id: &str, source: &str, fields: &[String], report: &DriftReport) -> Result<Ci, ApiError> {
    let now = state.now();
    let before = CiRepository::find_by_id_tx(tx, ci_id).await?.ok_or_else(|| ApiError::NotFound(format!("ci {ci_id} not found")))?;

    if source == "cmdb" {
        audit_log::record_tx(tx, Some(ci_id), "ci.drift.resolved", &json!({"source": "cmdb", "fields": fields, "before": before, "after": before}), now).await?;
        return Ok(before);
    }

    let source_report = report.sources.iter().find(|s| s.source == source).ok_or_else(|| ApiError::Validation(format!("no drift snapshot for source {source}")))?;

    let mut after = before.clone();
    for field in fields {
        if !RESOLVABLE_FIELDS.contains(&field.as_str()) {
            return Err(ApiError::Validation(format!("field {field} is not resolvable")));
        }
        let Some(mismatch) = source_report.mismatches.iter().find(|m| m.field == field) else {
            continue;
        };
        match field.as_str() {
            "name" => after.name = mismatch.external_value.as_str().unwrap_or(&after.name).to_string(),
            "ci_type" => after.ci_type = mismatch.external_value.as_str().unwrap_or(&after.ci_type).to_string(),
            "owner" => after.owner = mismatch.external_value.as_str().map(|s| s.to_string()).or(after.owner.clone()),
            _ => unreachable!(),
        }
    }
    after.source = source.to_string();
    after.updated_at = now;

    CiRepository::update(tx, &after).await?;
    audit_log::record_tx(tx, Some(ci_id), "ci.drift.resolved", &json!({"source": source, "fields": fields, "before": before, "after": after}), now).await?;

    Ok(after)
}

/// Opens and commits its own transaction; for HTTP callers sharing a
/// transaction with the approval gate, use [`resolve_tx`] directly.
#[instrument(skip(state, report))]
pub async fn resolve(state: &AppState, ci_id: &str, source: &str, fields: &[String], report: &DriftReport) -> Result<Ci, ApiError> {
    let connection = state.store.connection()?;
    let tx = connection.transaction().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    let after = resolve_tx(&tx, state, ci_id, source, fields, report).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(SourceStatus::NotApplicable).unwrap(), json!("not_applicable"));
    }

    #[test]
    fn unresolvable_field_name_is_rejected() {
        assert!(!RESOLVABLE_FIELDS.contains(&"status"));
    }
}
