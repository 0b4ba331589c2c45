// [apps/orchestrator/src/services/relationships.rs]
//! Thin service layer over `RelationshipRepository`: every mutation is
//! audited and, for creation, best-effort published downstream (C7). Every
//! entry point is approval-gated, so the `_tx` variants are what handlers
//! actually call — they run on the same transaction as the gate's
//! `check_and_consume_tx` (spec §5 Transactionality). The plain variants
//! open and commit their own transaction for direct (non-HTTP) callers
//! such as tests.

use crate::error::ApiError;
use crate::services::{audit_log, integration_publisher};
use crate::state::AppState;
use cmdb_infra_db::models::Relationship;
use cmdb_infra_db::repositories::{CiRepository, RelationshipRepository};
use libsql::Transaction;
use serde_json::json;
use tracing::instrument;

#[instrument(skip(tx, state))]
pub async fn create_tx(tx: &Transaction, state: &AppState, source_ci_id: &str, target_ci_id: &str, relation_type: &str, source: &str) -> Result<Relationship, ApiError> {
    let now = state.now();

    if CiRepository::find_by_id_tx(tx, source_ci_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("ci {source_ci_id} not found")));
    }
    if CiRepository::find_by_id_tx(tx, target_ci_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("ci {target_ci_id} not found")));
    }
    if source_ci_id == target_ci_id {
        return Err(ApiError::Validation("a relationship cannot link a ci to itself".into()));
    }

    let relationship = RelationshipRepository::upsert_tx(tx, source_ci_id, target_ci_id, relation_type, source, now).await?;
    audit_log::record_tx(tx, Some(source_ci_id), "relationship.created", &json!({"relationship": relationship}), now).await?;

    Ok(relationship)
}

#[instrument(skip(state))]
pub async fn create(state: &AppState, source_ci_id: &str, target_ci_id: &str, relation_type: &str, source: &str) -> Result<Relationship, ApiError> {
    let connection = state.store.connection()?;
    let tx = connection.transaction().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    let relationship = create_tx(&tx, state, source_ci_id, target_ci_id, relation_type, source).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;

    integration_publisher::publish_relationship_event(state, &relationship).await;
    Ok(relationship)
}

#[instrument(skip(state))]
pub async fn list_for_ci(state: &AppState, ci_id: &str) -> Result<Vec<Relationship>, ApiError> {
    let connection = state.store.connection()?;
    Ok(RelationshipRepository::list_for_ci(&connection, ci_id).await?)
}

#[instrument(skip(tx, state))]
pub async fn update_tx(tx: &Transaction, state: &AppState, id: &str, relation_type: &str) -> Result<Relationship, ApiError> {
    let now = state.now();

    let existing = RelationshipRepository::find_by_id_tx(tx, id).await?.ok_or_else(|| ApiError::NotFound(format!("relationship {id} not found")))?;
    RelationshipRepository::update_relation_type_tx(tx, id, relation_type).await?;
    audit_log::record_tx(tx, Some(&existing.source_ci_id), "relationship.updated", &json!({"relationship_id": id, "relation_type": relation_type}), now).await?;

    Ok(Relationship { relation_type: relation_type.to_string(), ..existing })
}

#[instrument(skip(state))]
pub async fn update(state: &AppState, id: &str, relation_type: &str) -> Result<Relationship, ApiError> {
    let connection = state.store.connection()?;
    let tx = connection.transaction().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    let relationship = update_tx(&tx, state, id, relation_type).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(relationship)
}

#[instrument(skip(tx, state))]
pub async fn delete_tx(tx: &Transaction, state: &AppState, id: &str) -> Result<(), ApiError> {
    let now = state.now();

    let relationship = RelationshipRepository::find_by_id_tx(tx, id).await?.ok_or_else(|| ApiError::NotFound(format!("relationship {id} not found")))?;
    RelationshipRepository::delete_tx(tx, id).await?;
    audit_log::record_tx(tx, Some(&relationship.source_ci_id), "relationship.deleted", &json!({"relationship_id": id}), now).await?;

    Ok(())
}

#[instrument(skip(state))]
pub async fn delete(state: &AppState, id: &str) -> Result<(), ApiError> {
    let connection = state.store.connection()?;
    let tx = connection.transaction().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    delete_tx(&tx, state, id).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use cmdb_infra_db::models::{Ci, CiStatus};
    use cmdb_infra_db::Store;
    use serde_json::Value as Json;

    async fn seed_ci(state: &AppState, id: &str) {
        let connection = state.store.connection().unwrap();
        let tx = connection.transaction().await.unwrap();
        let now = state.now();
        CiRepository::insert(
            &tx,
            &Ci {
                id: id.to_string(),
                name: id.to_string(),
                ci_type: "device".to_string(),
                source: "manual".to_string(),
                owner: None,
                status: CiStatus::Active,
                attributes: Json::Null,
                last_seen_at: now,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn create_rejects_self_link() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let state = AppState::new(store, Config::load_from_env());
        seed_ci(&state, "ci-1").await;

        let err = create(&state, "ci-1", "ci-1", "depends_on", "manual").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn update_changes_relation_type() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let state = AppState::new(store, Config::load_from_env());
        seed_ci(&state, "ci-1").await;
        seed_ci(&state, "ci-2").await;

        let relationship = create(&state, "ci-1", "ci-2", "depends_on", "manual").await.unwrap();
        let updated = update(&state, &relationship.id, "hosted_on").await.unwrap();
        assert_eq!(updated.relation_type, "hosted_on");
        assert_eq!(updated.id, relationship.id);
    }

    #[tokio::test]
    async fn create_then_delete_round_trips() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let state = AppState::new(store, Config::load_from_env());
        seed_ci(&state, "ci-1").await;
        seed_ci(&state, "ci-2").await;

        let relationship = create(&state, "ci-1", "ci-2", "depends_on", "manual").await.unwrap();
        let listed = list_for_ci(&state, "ci-1").await.unwrap();
        assert_eq!(listed.len(), 1);

        delete(&state, &relationship.id).await.unwrap();
        let listed = list_for_ci(&state, "ci-1").await.unwrap();
        assert!(listed.is_empty());
    }
}
