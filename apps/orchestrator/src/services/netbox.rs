// [apps/orchestrator/src/services/netbox.rs]
//! NetBox incremental pull (C7): walks `/dcim/devices/` and
//! `/virtualization/virtual-machines/` using the `last_updated__gte`
//! watermark filter, pages through `next` until `limit` items are
//! collected, and feeds each record into the reconciler. The watermark
//! only advances when a page is exhausted under the limit — a pull cut
//! short by `limit` must not lose progress (at-least-once).

use crate::error::ApiError;
use crate::services::reconciler::{self, IdentityInput, IngestCiPayload};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use cmdb_infra_db::repositories::SyncStateRepository;
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{instrument, warn};

pub const SOURCE: &str = "netbox";

struct EndpointSpec {
    path: &'static str,
    watermark_key: &'static str,
    identity_scheme: &'static str,
    identity_id_field: &'static str,
}

const DEVICES: EndpointSpec = EndpointSpec {
    path: "/dcim/devices/",
    watermark_key: "netbox.import.devices.last_updated",
    identity_scheme: "netbox_device_id",
    identity_id_field: "id",
};

const VIRTUAL_MACHINES: EndpointSpec = EndpointSpec {
    path: "/virtualization/virtual-machines/",
    watermark_key: "netbox.import.vms.last_updated",
    identity_scheme: "netbox_vm_id",
    identity_id_field: "id",
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PullSummary {
    pub endpoint: &'static str,
    pub fetched: usize,
    pub reconciled: usize,
    pub collisions: u32,
    pub watermark_advanced: bool,
}

pub async fn pull_devices(state: &AppState, limit: usize, dry_run: bool) -> Result<PullSummary, ApiError> {
    pull_endpoint(state, &DEVICES, limit, dry_run).await
}

pub async fn pull_virtual_machines(state: &AppState, limit: usize, dry_run: bool) -> Result<PullSummary, ApiError> {
    pull_endpoint(state, &VIRTUAL_MACHINES, limit, dry_run).await
}

#[instrument(skip(state, spec))]
async fn pull_endpoint(state: &AppState, spec: &EndpointSpec, limit: usize, dry_run: bool) -> Result<PullSummary, ApiError> {
    let base_url = state
        .config
        .netbox_url
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("NETBOX_URL not configured".into()))?;

    let connection = state.store.connection()?;
    let watermark = SyncStateRepository::get_timestamp(&connection, spec.watermark_key).await?;

    let mut summary = PullSummary { endpoint: spec.path, ..Default::default() };
    let mut max_observed: Option<DateTime<Utc>> = watermark;
    let mut next_url = Some(build_initial_url(base_url, spec, watermark, limit));
    let mut exhausted = true;

    while let Some(url) = next_url.take() {
        if summary.fetched >= limit {
            exhausted = false;
            break;
        }

        let mut request = state.http_client.get(&url);
        if let Some(token) = &state.config.netbox_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| ApiError::ServiceUnavailable(format!("netbox unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(ApiError::ServiceUnavailable(format!("netbox rejected pull with status {}", response.status())));
        }

        let body: Json = response.json().await.map_err(|e| ApiError::Internal(format!("netbox response decode failed: {e}")))?;
        let results = body.get("results").and_then(|v| v.as_array()).cloned().unwrap_or_default();

        for record in &results {
            if summary.fetched >= limit {
                exhausted = false;
                break;
            }
            summary.fetched += 1;

            if let Some(last_updated) = record.get("last_updated").and_then(|v| v.as_str()).and_then(|s| s.parse::<DateTime<Utc>>().ok()) {
                max_observed = Some(max_observed.map_or(last_updated, |current| current.max(last_updated)));
            }

            let Some(payload) = record_to_payload(spec, record) else {
                warn!(endpoint = spec.path, "skipping netbox record missing id/hostname");
                continue;
            };

            if !dry_run {
                match reconciler::reconcile(state, SOURCE, &payload).await {
                    Ok(outcome) => {
                        summary.reconciled += 1;
                        summary.collisions += outcome.collision_count;
                    }
                    Err(err) => warn!(endpoint = spec.path, error = %err, "netbox record reconciliation failed"),
                }
            }
        }

        next_url = body.get("next").and_then(|v| v.as_str()).map(|s| s.to_string());
    }

    if !dry_run && exhausted {
        if let Some(new_watermark) = max_observed {
            SyncStateRepository::set(&connection, spec.watermark_key, &new_watermark.to_rfc3339(), state.now()).await?;
            summary.watermark_advanced = true;
        }
    }

    Ok(summary)
}

fn build_initial_url(base_url: &str, spec: &EndpointSpec, watermark: Option<DateTime<Utc>>, limit: usize) -> String {
    let base = base_url.trim_end_matches('/');
    let mut url = format!("{base}{}?limit={}", spec.path, limit.min(250));
    if let Some(ts) = watermark {
        url.push_str(&format!("&last_updated__gte={}", ts.to_rfc3339()));
    }
    url
}

fn record_to_payload(spec: &EndpointSpec, record: &Json) -> Option<IngestCiPayload> {
    let id = record.get(spec.identity_id_field)?;
    let id_value = if let Some(s) = id.as_str() { s.to_string() } else { id.as_i64()?.to_string() };
    let hostname = record.get("name").and_then(|v| v.as_str())?.to_string();

    Some(IngestCiPayload {
        name: hostname.clone(),
        ci_type: if spec.identity_scheme == "netbox_device_id" { "device".to_string() } else { "virtual_machine".to_string() },
        owner: None,
        attributes: record.clone(),
        identities: vec![
            IdentityInput { scheme: spec.identity_scheme.to_string(), value: id_value },
            IdentityInput { scheme: "hostname".to_string(), value: hostname },
        ],
        last_seen_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_to_payload_extracts_identities() {
        let record = json!({"id": 42, "name": "web-01", "last_updated": "2026-01-01T00:00:00Z"});
        let payload = record_to_payload(&DEVICES, &record).unwrap();
        assert_eq!(payload.identities.len(), 2);
        assert_eq!(payload.identities[0].value, "42");
        assert_eq!(payload.identities[1].value, "web-01");
    }

    #[test]
    fn record_missing_name_is_skipped() {
        let record = json!({"id": 42});
        assert!(record_to_payload(&DEVICES, &record).is_none());
    }
}
