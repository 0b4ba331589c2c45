// [apps/orchestrator/src/services/reconciler.rs]
//! C4: identity-keyed CI reconciliation. Grounded on the teacher's
//! transactional upsert pattern (one `Transaction` per mutating operation,
//! committed alongside its audit events) generalized from "mission
//! ignition" semantics to CI upsert-with-collision-detection semantics.

use crate::clock::{monotonic_max, normalize_or_now};
use crate::error::ApiError;
use crate::services::audit_log;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use cmdb_infra_db::repositories::{CiRepository, CollisionRepository, IdentityRepository};
use cmdb_infra_db::models::{Ci, CiStatus};
use libsql::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityInput {
    pub scheme: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestCiPayload {
    pub name: String,
    pub ci_type: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "Json::default")]
    pub attributes: Json,
    pub identities: Vec<IdentityInput>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub ci: Ci,
    pub created: bool,
    /// True when an existing CI's fields were overwritten by precedence;
    /// false for a fresh create or a precedence-skipped merge.
    pub updated: bool,
    pub collision_count: u32,
    /// Post-commit notifications the caller must fire once its own
    /// transaction (which may span more than this one reconcile, e.g. a
    /// bulk batch) has committed. Empty when nothing to notify.
    #[serde(skip)]
    pub pending_notifications: Vec<(String, Json)>,
}

/// Identity-based upsert with source-precedence merge and collision
/// emission. Opens its own transaction and commits alone; for callers that
/// need to share a transaction with other writes (the approval gate's
/// consume, a bulk batch), use [`reconcile_tx`] directly.
#[instrument(skip(state, payload))]
pub async fn reconcile(state: &AppState, source: &str, payload: &IngestCiPayload) -> Result<ReconcileOutcome, ApiError> {
    let connection = state.store.connection()?;
    let tx = connection.transaction().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    let outcome = reconcile_tx(&tx, state, source, payload).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    notify_pending(state, &outcome.pending_notifications);
    Ok(outcome)
}

pub fn notify_pending(state: &AppState, pending: &[(String, Json)]) {
    for (message, detail) in pending {
        state.issue_notifier.notify(message, detail);
    }
}

/// Same upsert, scoped to a transaction the caller already opened (and
/// will commit). Callers are responsible for firing `pending_notifications`
/// via [`notify_pending`] only after that commit succeeds (spec §4.1 step 3
/// notifications must not fire for a rolled-back reconcile).
#[instrument(skip(tx, state, payload))]
pub async fn reconcile_tx(tx: &Transaction, state: &AppState, source: &str, payload: &IngestCiPayload) -> Result<ReconcileOutcome, ApiError> {
    if payload.identities.is_empty() {
        return Err(ApiError::Validation("payload.identities must be non-empty".into()));
    }

    let now = state.now();
    let incoming_last_seen = normalize_or_now(payload.last_seen_at, now);

    // Step 2: build the ordered, deduplicated list of matched CI ids.
    let mut matched_ids: Vec<String> = Vec::new();
    for identity in &payload.identities {
        if let Some(owner) = IdentityRepository::find_owner_tx(tx, &identity.scheme, &identity.value).await? {
            if !matched_ids.contains(&owner.ci_id) {
                matched_ids.push(owner.ci_id);
            }
        }
    }

    let mut owner_missing_ci: Option<String> = None;

    let (survivor, created, updated) = if matched_ids.is_empty() {
        // Step 3: no match, create a fresh CI.
        let ci = Ci {
            id: Uuid::new_v4().to_string(),
            name: payload.name.clone(),
            ci_type: payload.ci_type.clone(),
            source: source.to_string(),
            owner: payload.owner.clone(),
            status: CiStatus::Active,
            attributes: payload.attributes.clone(),
            last_seen_at: incoming_last_seen,
            created_at: now,
            updated_at: now,
        };
        CiRepository::insert(tx, &ci).await?;
        audit_log::record_tx(tx, Some(&ci.id), "ci.created", &json!({"source": source, "name": ci.name}), now).await?;

        if payload.owner.as_deref().unwrap_or("").trim().is_empty() {
            audit_log::record_tx(tx, Some(&ci.id), "governance.owner.missing", &json!({"ci_id": ci.id}), now).await?;
            owner_missing_ci = Some(ci.id.clone());
        }
        (ci, true, false)
    } else {
        // Step 4/5: survivor is the first matched CI; apply precedence merge.
        let survivor_id = matched_ids[0].clone();
        let existing = CiRepository::find_by_id_tx(tx, &survivor_id)
            .await?
            .ok_or_else(|| ApiError::Internal(format!("matched CI {survivor_id} vanished mid-transaction")))?;

        for other_id in matched_ids.iter().skip(1) {
            info!(existing = %existing.id, incoming = %other_id, "governance collision candidate from multi-match");
        }

        let incoming_rank = state.config.source_rank(source);
        let existing_rank = state.config.source_rank(&existing.source);
        let merged_last_seen = monotonic_max(existing.last_seen_at, incoming_last_seen);

        let (merged, overwritten) = if incoming_rank <= existing_rank {
            (
                Ci {
                    name: payload.name.clone(),
                    ci_type: payload.ci_type.clone(),
                    owner: payload.owner.clone(),
                    attributes: payload.attributes.clone(),
                    source: source.to_string(),
                    last_seen_at: merged_last_seen,
                    updated_at: now,
                    ..existing.clone()
                },
                true,
            )
        } else {
            (Ci { last_seen_at: merged_last_seen, ..existing.clone() }, false)
        };

        CiRepository::update(tx, &merged).await?;

        if overwritten {
            audit_log::record_tx(tx, Some(&merged.id), "ci.updated", &json!({"source": source, "name": merged.name}), now).await?;
        } else {
            audit_log::record_tx(tx, Some(&merged.id), "ci.reconcile.skipped_by_precedence", &json!({"incoming_source": source, "existing_source": existing.source}), now).await?;
        }

        (merged, false, overwritten)
    };

    // ensure_identities: bind unseen identities to the survivor, or flag a
    // governance collision when an identity already belongs elsewhere.
    let mut collision_count = 0u32;
    let mut collisions: Vec<Json> = Vec::new();
    for identity in &payload.identities {
        match IdentityRepository::find_owner_tx(tx, &identity.scheme, &identity.value).await? {
            None => {
                IdentityRepository::create(tx, &survivor.id, &identity.scheme, &identity.value, now).await?;
            }
            Some(owner) if owner.ci_id == survivor.id => {}
            Some(owner) => {
                let new_collision = CollisionRepository::record_open(tx, &identity.scheme, &identity.value, &survivor.id, &owner.ci_id, now).await?;
                if new_collision {
                    collision_count += 1;
                    let detail = json!({"scheme": identity.scheme, "value": identity.value, "existing_ci_id": survivor.id, "incoming_ci_id": owner.ci_id});
                    audit_log::record_tx(tx, Some(&survivor.id), "governance.collision.detected", &detail, now).await?;
                    collisions.push(detail);
                }
            }
        }
    }

    // Spec §4.1 step 3: owner-missing and every collision also fire an
    // issue-tracker notification, not just the audit row, per the original's
    // reconciliation.py (lines ~74 and ~137). Deferred until the caller's
    // transaction commits.
    let mut pending_notifications = Vec::new();
    if let Some(ci_id) = owner_missing_ci {
        pending_notifications.push(("CI created without an owner".to_string(), json!({"ci_id": ci_id})));
    }
    for detail in collisions {
        pending_notifications.push(("governance collision detected".to_string(), detail));
    }

    Ok(ReconcileOutcome { ci: survivor, created, updated, collision_count, pending_notifications })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use cmdb_infra_db::Store;

    async fn test_state() -> AppState {
        let store = Store::connect(":memory:", None).await.unwrap();
        let mut config = Config::load_from_env();
        config.source_precedence = vec!["manual".into(), "azure".into(), "vcenter".into(), "zabbix".into(), "k8s".into()];
        AppState::new(store, config)
    }

    fn payload(name: &str, scheme: &str, value: &str) -> IngestCiPayload {
        IngestCiPayload {
            name: name.to_string(),
            ci_type: "host".to_string(),
            owner: Some("team-a".to_string()),
            attributes: json!({}),
            identities: vec![IdentityInput { scheme: scheme.to_string(), value: value.to_string() }],
            last_seen_at: None,
        }
    }

    #[tokio::test]
    async fn reconcile_precedence_scenario() {
        let state = test_state().await;
        let first = reconcile(&state, "azure", &payload("old", "hostname", "web-01")).await.unwrap();
        assert!(first.created);
        assert_eq!(first.ci.source, "azure");

        let second = reconcile(&state, "manual", &payload("new", "hostname", "web-01")).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.ci.name, "new");
        assert_eq!(second.ci.source, "manual");
    }

    #[tokio::test]
    async fn reconcile_collision_scenario() {
        let state = test_state().await;
        reconcile(&state, "manual", &payload("ci-a", "scheme-x", "id-a")).await.unwrap();
        reconcile(&state, "azure", &payload("ci-b", "scheme-x", "id-b")).await.unwrap();

        let multi = IngestCiPayload {
            name: "merged".to_string(),
            ci_type: "host".to_string(),
            owner: Some("team-a".to_string()),
            attributes: json!({}),
            identities: vec![
                IdentityInput { scheme: "scheme-x".into(), value: "id-b".into() },
                IdentityInput { scheme: "scheme-x".into(), value: "id-a".into() },
            ],
            last_seen_at: None,
        };
        let outcome = reconcile(&state, "zabbix", &multi).await.unwrap();
        assert!(!outcome.created);
        assert!(outcome.collision_count >= 1);
    }

    #[tokio::test]
    async fn last_seen_at_never_regresses() {
        let state = test_state().await;
        let first = reconcile(&state, "manual", &payload("a", "hostname", "h1")).await.unwrap();
        let older_payload = IngestCiPayload { last_seen_at: Some(first.ci.last_seen_at - chrono::Duration::days(1)), ..payload("a", "hostname", "h1") };
        let second = reconcile(&state, "manual", &older_payload).await.unwrap();
        assert_eq!(second.ci.last_seen_at, first.ci.last_seen_at);
    }
}
