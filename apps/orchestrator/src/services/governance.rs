// [apps/orchestrator/src/services/governance.rs]
//! C5: list/resolve/reopen governance collisions. Thin over
//! `CollisionRepository`; every mutation doubles into the audit trail.
//! `resolve`/`reopen` are approval-gated, so the `_tx` variants run on the
//! handler's own transaction alongside the gate's consume.

use crate::error::ApiError;
use crate::services::audit_log;
use crate::state::AppState;
use cmdb_infra_db::models::GovernanceCollision;
use cmdb_infra_db::repositories::CollisionRepository;
use libsql::Transaction;
use serde_json::json;
use tracing::instrument;

#[instrument(skip(state))]
pub async fn list(state: &AppState, status: Option<&str>) -> Result<Vec<GovernanceCollision>, ApiError> {
    let connection = state.store.connection()?;
    Ok(CollisionRepository::list(&connection, status).await?)
}

#[instrument(skip(tx, state))]
pub async fn resolve_tx(tx: &Transaction, state: &AppState, id: &str, note: Option<&str>) -> Result<GovernanceCollision, ApiError> {
    let existing = CollisionRepository::find_by_id_tx(tx, id).await?.ok_or_else(|| ApiError::NotFound(format!("collision {id} not found")))?;

    let now = state.now();
    CollisionRepository::resolve_tx(tx, id, note, now).await?;
    audit_log::record_tx(tx, Some(&existing.existing_ci_id), "governance.collision.resolved", &json!({"collision_id": id, "note": note}), now).await?;

    Ok(CollisionRepository::find_by_id_tx(tx, id).await?.expect("just resolved"))
}

#[instrument(skip(state))]
pub async fn resolve(state: &AppState, id: &str, note: Option<&str>) -> Result<GovernanceCollision, ApiError> {
    let connection = state.store.connection()?;
    let tx = connection.transaction().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    let collision = resolve_tx(&tx, state, id, note).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(collision)
}

#[instrument(skip(tx, state))]
pub async fn reopen_tx(tx: &Transaction, state: &AppState, id: &str) -> Result<GovernanceCollision, ApiError> {
    let existing = CollisionRepository::find_by_id_tx(tx, id).await?.ok_or_else(|| ApiError::NotFound(format!("collision {id} not found")))?;

    let now = state.now();
    CollisionRepository::reopen_tx(tx, id).await?;
    audit_log::record_tx(tx, Some(&existing.existing_ci_id), "governance.collision.reopened", &json!({"collision_id": id}), now).await?;

    Ok(CollisionRepository::find_by_id_tx(tx, id).await?.expect("just reopened"))
}

#[instrument(skip(state))]
pub async fn reopen(state: &AppState, id: &str) -> Result<GovernanceCollision, ApiError> {
    let connection = state.store.connection()?;
    let tx = connection.transaction().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    let collision = reopen_tx(&tx, state, id).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(collision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::reconciler::{reconcile, IdentityInput, IngestCiPayload};
    use cmdb_infra_db::Store;
    use serde_json::json as jsonmacro;

    async fn state_with_collision() -> (AppState, String) {
        let store = Store::connect(":memory:", None).await.unwrap();
        let state = AppState::new(store, Config::load_from_env());

        let base = IngestCiPayload {
            name: "a".into(),
            ci_type: "host".into(),
            owner: Some("team".into()),
            attributes: jsonmacro!({}),
            identities: vec![IdentityInput { scheme: "scheme-x".into(), value: "id-a".into() }],
            last_seen_at: None,
        };
        reconcile(&state, "manual", &base).await.unwrap();
        let other = IngestCiPayload { identities: vec![IdentityInput { scheme: "scheme-x".into(), value: "id-b".into() }], ..base.clone() };
        reconcile(&state, "manual", &other).await.unwrap();

        let merge = IngestCiPayload {
            identities: vec![IdentityInput { scheme: "scheme-x".into(), value: "id-b".into() }, IdentityInput { scheme: "scheme-x".into(), value: "id-a".into() }],
            ..base
        };
        reconcile(&state, "manual", &merge).await.unwrap();

        let collisions = list(&state, Some("OPEN")).await.unwrap();
        let id = collisions.first().expect("collision should exist").id.clone();
        (state, id)
    }

    #[tokio::test]
    async fn resolve_then_reopen_round_trips() {
        let (state, id) = state_with_collision().await;
        let resolved = resolve(&state, &id, Some("dup confirmed")).await.unwrap();
        assert_eq!(resolved.status.as_str(), "RESOLVED");

        let reopened = reopen(&state, &id).await.unwrap();
        assert_eq!(reopened.status.as_str(), "OPEN");
        assert!(reopened.resolution_note.is_none());
    }

    #[tokio::test]
    async fn resolve_missing_is_not_found() {
        let (state, _id) = state_with_collision().await;
        let err = resolve(&state, "does-not-exist", None).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
