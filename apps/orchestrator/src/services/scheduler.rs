// [apps/orchestrator/src/services/scheduler.rs]
//! C9: periodic schedule evaluator plus the expired-approval sweeper.
//! Two named schedules (`netbox-import`, `backstage-sync`); each advances
//! its own `sync.schedule.<name>.next_run_at` watermark whether or not it
//! actually enqueues, so a disabled feature doesn't spin the evaluator.

use crate::error::ApiError;
use crate::services::audit_log;
use crate::services::queue::{self, JOB_BACKSTAGE_SYNC, JOB_NETBOX_IMPORT};
use crate::state::AppState;
use chrono::Duration as ChronoDuration;
use cmdb_infra_db::repositories::{ApprovalRepository, SyncJobRepository, SyncStateRepository};
use serde_json::json;
use std::time::Duration;
use tracing::{info, instrument, warn};

struct Schedule {
    name: &'static str,
    job_type: &'static str,
    interval: ChronoDuration,
}

fn schedules(state: &AppState) -> Vec<Schedule> {
    vec![
        Schedule { name: "netbox-import", job_type: JOB_NETBOX_IMPORT, interval: ChronoDuration::seconds(state.config.sync_worker_poll_seconds as i64 * 12) },
        Schedule { name: "backstage-sync", job_type: JOB_BACKSTAGE_SYNC, interval: ChronoDuration::seconds(state.config.sync_worker_poll_seconds as i64 * 12) },
    ]
}

fn is_ready(state: &AppState, job_type: &str) -> Result<(), &'static str> {
    match job_type {
        JOB_NETBOX_IMPORT => {
            if !state.config.netbox_sync_enabled {
                return Err("netbox_sync_disabled");
            }
            if state.config.netbox_url.is_none() {
                return Err("netbox_url_missing");
            }
            Ok(())
        }
        JOB_BACKSTAGE_SYNC => {
            if !state.config.backstage_sync_enabled {
                return Err("backstage_sync_disabled");
            }
            if state.config.backstage_url.is_none() {
                return Err("backstage_url_missing");
            }
            Ok(())
        }
        _ => Err("unknown_job_type"),
    }
}

#[instrument(skip(state))]
pub async fn evaluate_schedules(state: &AppState) -> Result<(), ApiError> {
    let now = state.now();
    let connection = state.store.connection()?;

    for schedule in schedules(state) {
        let watermark_key = format!("sync.schedule.{}.next_run_at", schedule.name);
        let next_run_at = SyncStateRepository::get_timestamp(&connection, &watermark_key).await?.unwrap_or(now);

        if now < next_run_at {
            continue;
        }

        match is_ready(state, schedule.job_type) {
            Err(reason) => {
                SyncStateRepository::set(&connection, &watermark_key, &(now + schedule.interval).to_rfc3339(), now).await?;
                audit_log::record(&connection, None, "integration.schedule.skipped", &json!({"schedule": schedule.name, "reason": reason}), now).await?;
            }
            Ok(()) => {
                let inflight = SyncJobRepository::has_inflight(&connection, schedule.job_type, "scheduler").await?;
                if !inflight {
                    let job = SyncJobRepository::enqueue(&connection, schedule.job_type, "scheduler", &json!({}), 3, now, now).await?;
                    audit_log::record(&connection, None, "integration.schedule.triggered", &json!({"schedule": schedule.name, "job_id": job.id}), now).await?;
                }
                SyncStateRepository::set(&connection, &watermark_key, &(now + schedule.interval).to_rfc3339(), now).await?;
            }
        }
    }

    Ok(())
}

#[instrument(skip(state))]
pub async fn sweep_expired_approvals(state: &AppState) -> Result<u64, ApiError> {
    let now = state.now();
    let connection = state.store.connection()?;
    let count = ApprovalRepository::sweep_expired(&connection, now).await?;
    if count > 0 {
        audit_log::record(&connection, None, "approval.expired", &json!({"count": count}), now).await?;
    }
    Ok(count)
}

/// Single cooperative loop handling both schedule evaluation and the
/// approval sweeper, ticking at the sweeper's (usually tighter) interval.
pub async fn spawn_scheduler_loop(state: AppState) {
    info!("scheduler loop starting");
    loop {
        if state.is_stopping() {
            break;
        }

        if state.config.sync_scheduler_enabled {
            if let Err(err) = evaluate_schedules(&state).await {
                warn!(error = %err, "schedule evaluation errored");
            }
        }

        if let Err(err) = sweep_expired_approvals(&state).await {
            warn!(error = %err, "approval sweep errored");
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(state.config.approval_cleanup_interval_seconds)) => {}
            _ = state.wait_for_shutdown() => break,
        }
    }
    info!("scheduler loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use cmdb_infra_db::Store;

    #[tokio::test]
    async fn disabled_netbox_still_advances_watermark() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let mut config = Config::load_from_env();
        config.sync_scheduler_enabled = true;
        config.netbox_sync_enabled = false;
        let state = AppState::new(store, config);

        evaluate_schedules(&state).await.unwrap();

        let connection = state.store.connection().unwrap();
        let watermark = SyncStateRepository::get(&connection, "sync.schedule.netbox-import.next_run_at").await.unwrap();
        assert!(watermark.is_some());

        let jobs = SyncJobRepository::list_recent(&connection, 10).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn ready_schedule_enqueues_exactly_once_per_tick() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let mut config = Config::load_from_env();
        config.sync_scheduler_enabled = true;
        config.netbox_sync_enabled = true;
        config.netbox_url = Some("https://netbox.example.com/api".to_string());
        config.backstage_sync_enabled = false;
        let state = AppState::new(store, config);

        evaluate_schedules(&state).await.unwrap();
        evaluate_schedules(&state).await.unwrap();

        let connection = state.store.connection().unwrap();
        let jobs = SyncJobRepository::list_recent(&connection, 10).await.unwrap();
        assert_eq!(jobs.iter().filter(|j| j.job_type == JOB_NETBOX_IMPORT).count(), 1);
    }

    #[tokio::test]
    async fn sweeper_rejects_expired_pending_approvals() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let state = AppState::new(store, Config::load_from_env());
        let connection = state.store.connection().unwrap();

        let now = state.now();
        ApprovalRepository::create(&connection, "POST", "/cis/abc", "deadbeef", &json!({}), None, "operator-1", now - ChronoDuration::minutes(1), now - ChronoDuration::minutes(5)).await.unwrap();

        let count = sweep_expired_approvals(&state).await.unwrap();
        assert_eq!(count, 1);
    }
}
