// [apps/orchestrator/src/services/queue.rs]
//! C8: DB-backed job queue. `claim_next` (in `cmdb-infra-db`) is the
//! single-writer-safe conditional update; this module owns dispatch,
//! retry-with-backoff, and the worker loop. Grounded on the teacher's
//! `services/reaper.rs` daemon-loop shape (tick, act, repeat, cooperative
//! shutdown) generalized from a pure maintenance sweep into claim-execute.

use crate::error::{sanitize_error_slug, ApiError};
use crate::services::audit_log;
use crate::services::{backstage, netbox};
use crate::state::AppState;
use chrono::Duration as ChronoDuration;
use cmdb_infra_db::models::{JobStatus, SyncJob};
use cmdb_infra_db::repositories::SyncJobRepository;
use libsql::Transaction;
use serde_json::{json, Value as Json};
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const JOB_NETBOX_IMPORT: &str = "netbox.import";
pub const JOB_BACKSTAGE_SYNC: &str = "backstage.sync";

/// Runs on the caller's transaction — the approval gate's, when the
/// enqueue is behind the maker-checker gate.
#[instrument(skip(tx, state, payload))]
pub async fn enqueue_tx(tx: &Transaction, state: &AppState, job_type: &str, requested_by: &str, payload: Json, max_attempts: i64) -> Result<SyncJob, ApiError> {
    let now = state.now();
    let job = SyncJobRepository::enqueue_tx(tx, job_type, requested_by, &payload, max_attempts, now, now).await?;
    audit_log::record_tx(tx, None, "integration.job.enqueued", &json!({"job_id": job.id, "job_type": job_type}), now).await?;
    Ok(job)
}

#[instrument(skip(state, payload))]
pub async fn enqueue(state: &AppState, job_type: &str, requested_by: &str, payload: Json, max_attempts: i64) -> Result<SyncJob, ApiError> {
    let connection = state.store.connection()?;
    let tx = connection.transaction().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    let job = enqueue_tx(&tx, state, job_type, requested_by, payload, max_attempts).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(job)
}

/// Dispatches a claimed job by `job_type`. Never propagates an `ApiError`
/// up to the caller — every outcome is folded into `Ok`/`Err(String)` so
/// the retry/terminal-fail bookkeeping always runs.
async fn execute(state: &AppState, job: &SyncJob) -> Result<Json, String> {
    let dry_run = job.payload.get("dry_run").and_then(|v| v.as_bool()).unwrap_or(false);
    let limit = job.payload.get("limit").and_then(|v| v.as_u64()).unwrap_or(100) as usize;

    match job.job_type.as_str() {
        JOB_NETBOX_IMPORT => {
            let devices = netbox::pull_devices(state, limit, dry_run).await.map_err(|e| format!("upstream_http_error: {e}"))?;
            let vms = netbox::pull_virtual_machines(state, limit, dry_run).await.map_err(|e| format!("upstream_http_error: {e}"))?;
            Ok(json!({"devices": devices, "virtual_machines": vms}))
        }
        JOB_BACKSTAGE_SYNC => {
            let token = backstage::resolve_bearer(state);
            if token.is_none() && state.config.backstage_sync_enabled {
                return Err("upstream_request_error: no backstage credential configured".to_string());
            }
            Ok(json!({"dry_run": dry_run, "authenticated": token.is_some()}))
        }
        other => Err(format!("job_execution_failed: unknown job_type {other}")),
    }
}

#[instrument(skip(state))]
pub async fn claim_and_execute(state: &AppState) -> Result<bool, ApiError> {
    let now = state.now();
    let connection = state.store.connection()?;

    let Some(job) = SyncJobRepository::claim_next(&connection, now).await? else {
        return Ok(false);
    };

    info!(job_id = %job.id, job_type = %job.job_type, "claimed sync job");

    match execute(state, &job).await {
        Ok(result) => {
            SyncJobRepository::mark_succeeded(&connection, &job.id, &result, state.now()).await?;
            audit_log::record(&connection, None, "integration.job.succeeded", &json!({"job_id": job.id}), state.now()).await?;
        }
        Err(raw_error) => {
            let slug = sanitize_error_slug(&raw_error);
            if job.attempt_count < job.max_attempts {
                let backoff_seconds = state.config.sync_job_retry_base_seconds as i64 * 2i64.pow((job.attempt_count - 1).max(0) as u32);
                let next_run_at = state.now() + ChronoDuration::seconds(backoff_seconds);
                SyncJobRepository::mark_retry(&connection, &job.id, &slug, next_run_at, state.now()).await?;
                audit_log::record(&connection, None, "integration.job.retry_scheduled", &json!({"job_id": job.id, "next_run_at": next_run_at, "error": slug}), state.now()).await?;
            } else {
                SyncJobRepository::mark_failed(&connection, &job.id, &slug, state.now()).await?;
                audit_log::record(&connection, None, "integration.job.failed", &json!({"job_id": job.id, "error": slug}), state.now()).await?;
                state.telemetry.tick("sync.job_failed", state.now());
            }
            warn!(job_id = %job.id, error = %slug, "sync job execution failed");
        }
    }

    Ok(true)
}

/// Cooperative worker loop: claim-and-execute on each tick; if nothing to
/// claim, wait `poll_seconds`. Joined with a timeout on shutdown by the
/// caller (`kernel.rs`).
pub async fn spawn_worker_loop(state: AppState) {
    info!("sync job worker loop starting");
    loop {
        if state.is_stopping() {
            break;
        }

        match claim_and_execute(&state).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => warn!(error = %err, "sync job claim/execute errored"),
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(state.config.sync_worker_poll_seconds)) => {}
            _ = state.wait_for_shutdown() => break,
        }
    }
    info!("sync job worker loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use cmdb_infra_db::Store;

    #[tokio::test]
    async fn enqueue_then_claim_transitions_to_running() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let state = AppState::new(store, Config::load_from_env());

        let job = enqueue(&state, JOB_BACKSTAGE_SYNC, "operator-1", json!({"dry_run": true}), 3).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let claimed = claim_and_execute(&state).await.unwrap();
        assert!(claimed);

        let connection = state.store.connection().unwrap();
        let refreshed = SyncJobRepository::find_by_id(&connection, &job.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, JobStatus::Succeeded);
        assert_eq!(refreshed.attempt_count, 1);
    }

    #[tokio::test]
    async fn unknown_job_type_exhausts_retries_then_fails() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let state = AppState::new(store, Config::load_from_env());

        let job = enqueue(&state, "unknown.job", "operator-1", json!({}), 1).await.unwrap();
        claim_and_execute(&state).await.unwrap();

        let connection = state.store.connection().unwrap();
        let refreshed = SyncJobRepository::find_by_id(&connection, &job.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, JobStatus::Failed);
        assert!(refreshed.last_error.is_some());
    }
}
