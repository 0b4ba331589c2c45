// [apps/orchestrator/src/services/lifecycle.rs]
//! C6: periodic state-machine pass over all CIs, plus orphan detection.
//! Processing is paged (batch size 1000) to bound memory; external
//! notifications fire after the DB flush so upstream HTTP latency never
//! holds the write transaction (spec §4.3). The HTTP-triggered run is
//! approval-gated, so the whole paged pass shares one transaction with the
//! gate's consume — it commits once, at the very end.

use crate::clock::inactive_days;
use crate::error::ApiError;
use crate::services::audit_log;
use crate::services::notifier::IssueTrackerNotifier;
use crate::state::AppState;
use cmdb_infra_db::models::CiStatus;
use cmdb_infra_db::repositories::CiRepository;
use libsql::Transaction;
use serde::Serialize;
use serde_json::json;
use tracing::instrument;

const BATCH_SIZE: i64 = 1000;

fn target_status(days: i64, staging_days: i64, review_days: i64, retired_days: i64) -> CiStatus {
    if days >= retired_days {
        CiStatus::Retired
    } else if days >= review_days {
        CiStatus::RetirementReview
    } else if days >= staging_days {
        CiStatus::Staging
    } else {
        CiStatus::Active
    }
}

#[derive(Debug, Default, Serialize)]
pub struct LifecycleRunSummary {
    pub cis_scanned: u64,
    pub transitions: u64,
    pub orphans_detected: u64,
}

/// Runs the full paged pass on the caller's transaction. Callers own the
/// single commit and must defer `pending_notifications`-equivalent
/// dispatch until after it succeeds — see [`run`] for the default wiring.
#[instrument(skip(tx, state))]
pub async fn run_tx(tx: &Transaction, state: &AppState) -> Result<(LifecycleRunSummary, Vec<(String, serde_json::Value)>), ApiError> {
    let now = state.now();
    let mut summary = LifecycleRunSummary::default();
    let mut pending_notifications: Vec<(String, serde_json::Value)> = Vec::new();

    let mut offset = 0i64;
    loop {
        let page = CiRepository::list_page_tx(tx, offset, BATCH_SIZE).await?;
        if page.is_empty() {
            break;
        }
        let page_len = page.len() as i64;

        for ci in &page {
            summary.cis_scanned += 1;
            let days = inactive_days(now, ci.last_seen_at);
            let target = target_status(days, state.config.lifecycle_staging_days, state.config.lifecycle_review_days, state.config.lifecycle_retired_days);

            if target != ci.status {
                CiRepository::set_status_tx(tx, &ci.id, target, now).await?;
                audit_log::record_tx(
                    tx,
                    Some(&ci.id),
                    "ci.lifecycle.transitioned",
                    &json!({"from": ci.status.as_str(), "to": target.as_str(), "inactive_days": days}),
                    now,
                )
                .await?;
                summary.transitions += 1;

                if matches!(target, CiStatus::RetirementReview) {
                    pending_notifications.push((
                        format!("CI {} entered RETIREMENT_REVIEW after {} inactive days", ci.name, days),
                        json!({"ci_id": ci.id, "inactive_days": days}),
                    ));
                }
            }
        }

        offset += page_len;
        if page_len < BATCH_SIZE {
            break;
        }
    }

    // Orphan detection: independent pass, also paged.
    let mut offset = 0i64;
    loop {
        let orphans = CiRepository::find_orphans_tx(tx, offset, BATCH_SIZE).await?;
        if orphans.is_empty() {
            break;
        }
        let page_len = orphans.len() as i64;

        for ci in &orphans {
            audit_log::record_tx(tx, Some(&ci.id), "governance.orphan.detected", &json!({"ci_id": ci.id}), now).await?;
            summary.orphans_detected += 1;
            pending_notifications.push((format!("CI {} has no relationships", ci.name), json!({"ci_id": ci.id})));
        }

        offset += page_len;
        if page_len < BATCH_SIZE {
            break;
        }
    }

    Ok((summary, pending_notifications))
}

/// Opens and commits its own transaction, dispatching notifications only
/// after the commit succeeds so upstream HTTP latency never holds the
/// write transaction open.
#[instrument(skip(state))]
pub async fn run(state: &AppState) -> Result<LifecycleRunSummary, ApiError> {
    let connection = state.store.connection()?;
    let tx = connection.transaction().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    let (summary, pending_notifications) = run_tx(&tx, state).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;

    for (summary_text, detail) in pending_notifications {
        state.issue_notifier.notify(&summary_text, &detail);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::reconciler::{reconcile, IdentityInput, IngestCiPayload};
    use chrono::Duration;
    use cmdb_infra_db::Store;
    use serde_json::json as jsonmacro;

    #[tokio::test]
    async fn lifecycle_scenario_transitions_to_retirement_review() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let mut config = Config::load_from_env();
        config.lifecycle_staging_days = 30;
        config.lifecycle_review_days = 90;
        config.lifecycle_retired_days = 120;
        let state = AppState::new(store, config);

        let payload = IngestCiPayload {
            name: "stale-host".into(),
            ci_type: "host".into(),
            owner: Some("team".into()),
            attributes: jsonmacro!({}),
            identities: vec![IdentityInput { scheme: "hostname".into(), value: "h1".into() }],
            last_seen_at: Some(state.now() - Duration::days(95)),
        };
        reconcile(&state, "manual", &payload).await.unwrap();

        let summary = run(&state).await.unwrap();
        assert_eq!(summary.transitions, 1);

        let connection = state.store.connection().unwrap();
        let ci = CiRepository::list_page(&connection, 0, 10).await.unwrap().remove(0);
        assert_eq!(ci.status, CiStatus::RetirementReview);
    }

    #[tokio::test]
    async fn lifecycle_is_idempotent_at_fixed_clock() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let state = AppState::new(store, Config::load_from_env());

        let payload = IngestCiPayload {
            name: "host".into(),
            ci_type: "host".into(),
            owner: Some("team".into()),
            attributes: jsonmacro!({}),
            identities: vec![IdentityInput { scheme: "hostname".into(), value: "h1".into() }],
            last_seen_at: Some(state.now() - Duration::days(95)),
        };
        reconcile(&state, "manual", &payload).await.unwrap();

        run(&state).await.unwrap();
        let second = run(&state).await.unwrap();
        assert_eq!(second.transitions, 0);
    }
}
