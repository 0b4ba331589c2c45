// [apps/orchestrator/src/services/approval_gate.rs]
//! C11: maker-checker gate. An approval binds to one exact mutating
//! request (method + path + payload hash). `begin` opens the transaction
//! the mutating handler will also use for its own writes and runs
//! `check_and_consume_tx` on it without committing, so CONSUMED and the
//! guarded mutation land in one commit, or neither does if the handler
//! fails first (spec §5 Transactionality). Hashing follows the teacher's
//! `sha2`-based content-hash idiom seen in `services/reaper.rs`'s dedup
//! keys, generalized to canonical JSON.

use crate::error::ApiError;
use crate::services::audit_log;
use crate::state::AppState;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cmdb_infra_db::models::{ApprovalStatus, ChangeApproval};
use cmdb_infra_db::repositories::ApprovalRepository;
use libsql::Transaction;
use serde_json::{json, Map, Value as Json};
use sha2::{Digest, Sha256};
use tracing::instrument;

/// Canonicalizes a JSON value by recursively sorting object keys, then
/// hashes its compact serialization. `None`/empty bodies hash the empty
/// string, matching how GET-shaped mutations (no body) are represented.
pub fn canonical_payload_hash(body: Option<&Json>) -> String {
    let canonical = body.map(canonicalize).unwrap_or(Json::Null);
    let bytes = match &canonical {
        Json::Null => Vec::new(),
        other => other.to_string().into_bytes(),
    };
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

fn canonicalize(value: &Json) -> Json {
    match value {
        Json::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Json::Object(sorted)
        }
        Json::Array(items) => Json::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[instrument(skip(state, payload_preview, reason))]
pub async fn create(state: &AppState, method: &str, request_path: &str, payload_hash: &str, payload_preview: &Json, reason: Option<&str>, requested_by: &str) -> Result<ChangeApproval, ApiError> {
    let now = state.now();
    let expires_at = now + ChronoDuration::minutes(state.config.maker_checker_default_ttl_minutes);
    let connection = state.store.connection()?;

    let approval = ApprovalRepository::create(&connection, method, request_path, payload_hash, payload_preview, reason, requested_by, expires_at, now).await?;
    audit_log::record(&connection, None, "approval.requested", &json!({"approval_id": approval.id, "request_path": request_path, "method": method}), now).await?;
    Ok(approval)
}

#[instrument(skip(state))]
pub async fn decide(state: &AppState, id: &str, approved: bool, decided_by: &str, note: Option<&str>) -> Result<ChangeApproval, ApiError> {
    let now = state.now();
    let connection = state.store.connection()?;

    let approval = ApprovalRepository::find_by_id(&connection, id).await?.ok_or_else(|| ApiError::NotFound(format!("approval {id} not found")))?;
    if approval.status != ApprovalStatus::Pending {
        return Err(ApiError::Conflict("approval is not pending".into()));
    }
    if now > approval.expires_at {
        return Err(ApiError::Conflict("approval has expired".into()));
    }
    if approval.requested_by == decided_by {
        return Err(ApiError::Conflict("self-approval is not allowed".into()));
    }

    ApprovalRepository::decide(&connection, id, approved, decided_by, note, now).await?;
    let event_type = if approved { "approval.approved" } else { "approval.rejected" };
    audit_log::record(&connection, None, event_type, &json!({"approval_id": id, "decided_by": decided_by}), now).await?;

    ApprovalRepository::find_by_id(&connection, id).await?.ok_or_else(|| ApiError::Internal("approval vanished after decision".into()))
}

/// The seven-step binding check from spec §4.6, run inside the handler's
/// open transaction right before the mutation it guards executes.
#[instrument(skip(tx, payload_hash))]
pub async fn check_and_consume_tx(tx: &Transaction, approval_id: &str, caller_principal: &str, bind_requester: bool, method: &str, request_path: &str, payload_hash: &str, now: DateTime<Utc>) -> Result<ChangeApproval, ApiError> {
    let approval = find_by_id_tx(tx, approval_id).await?.ok_or_else(|| ApiError::NotFound(format!("approval {approval_id} not found")))?;

    if approval.status != ApprovalStatus::Approved {
        return Err(ApiError::Conflict("approval is not in APPROVED state".into()));
    }
    if now > approval.expires_at {
        return Err(ApiError::Conflict("approval has expired".into()));
    }
    if bind_requester && approval.requested_by != caller_principal {
        return Err(ApiError::Forbidden("approval is bound to a different requester".into()));
    }
    if approval.method != method {
        return Err(ApiError::Conflict("approval method does not match this request".into()));
    }
    if approval.request_path != request_path {
        return Err(ApiError::Conflict("approval path does not match this request".into()));
    }
    if approval.payload_hash != payload_hash {
        return Err(ApiError::Conflict("approval payload hash does not match this request body".into()));
    }

    ApprovalRepository::consume_tx(tx, approval_id, now).await?;
    audit_log::record_tx(tx, None, "approval.consumed", &json!({"approval_id": approval_id}), now).await?;
    Ok(approval)
}

/// Spec §4.8's canonical hash: re-serialize JSON bodies with sorted keys,
/// fall back to hashing the raw bytes for anything else. An empty body and
/// an unparseable non-JSON body both reduce to hashing `body` as-is, so an
/// empty byte slice matches [`canonical_payload_hash`]'s `None` case.
pub fn hash_request_body(body: &[u8], content_type: Option<&str>) -> String {
    let is_json = content_type.map(|ct| ct.contains("application/json")).unwrap_or(false);
    if is_json {
        if let Ok(value) = serde_json::from_slice::<Json>(body) {
            return canonical_payload_hash(Some(&value));
        }
    }
    hex::encode(Sha256::digest(body))
}

/// Opens the transaction a mutating handler will perform its own writes
/// on, running the spec §4.8 gate on it first without committing. A no-op
/// check when maker-checker is disabled or the path is under `/approvals`
/// itself, but a transaction is always returned — the caller always owns
/// exactly one `tx.commit()` for both the consume and the mutation.
#[instrument(skip(state, body))]
pub async fn begin(state: &AppState, caller_principal: &str, method: &str, request_path: &str, body: &[u8], content_type: Option<&str>, approval_header: Option<&str>) -> Result<Transaction, ApiError> {
    let connection = state.store.connection()?;
    let tx = connection.transaction().await.map_err(|e| ApiError::Internal(e.to_string()))?;

    if state.config.maker_checker_enabled && !request_path.starts_with("/approvals") {
        let approval_id = approval_header.ok_or_else(|| ApiError::Validation("x-cmdb-approval-id header is required".into()))?;
        let hash = hash_request_body(body, content_type);
        let now = state.now();
        check_and_consume_tx(&tx, approval_id, caller_principal, state.config.maker_checker_bind_requester, method, request_path, &hash, now).await?;
    }

    Ok(tx)
}

async fn find_by_id_tx(tx: &Transaction, id: &str) -> Result<Option<ChangeApproval>, cmdb_infra_db::DbError> {
    use libsql::params;

    const SELECT_COLUMNS: &str = "id, method, request_path, payload_hash, payload_preview, reason, requested_by, status, decided_by, decision_note, created_at, expires_at, decided_at, consumed_at";
    let mut rows = tx.query(&format!("SELECT {SELECT_COLUMNS} FROM change_approvals WHERE id = ?1"), params![id]).await?;
    let Some(row) = rows.next().await? else { return Ok(None) };

    let preview_raw: String = row.get(4).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?;
    let created_raw: String = row.get(10).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?;
    let expires_raw: String = row.get(11).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?;
    let decided_raw: Option<String> = row.get(12).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?;
    let consumed_raw: Option<String> = row.get(13).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?;

    Ok(Some(ChangeApproval {
        id: row.get(0).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        method: row.get(1).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        request_path: row.get(2).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        payload_hash: row.get(3).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        payload_preview: serde_json::from_str(&preview_raw).unwrap_or(Json::Null),
        reason: row.get(5).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        requested_by: row.get(6).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        status: ApprovalStatus::parse(&row.get::<String>(7).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?),
        decided_by: row.get(8).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        decision_note: row.get(9).map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        created_at: created_raw.parse::<DateTime<Utc>>().map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        expires_at: expires_raw.parse::<DateTime<Utc>>().map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        decided_at: decided_raw.map(|s| s.parse::<DateTime<Utc>>()).transpose().map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
        consumed_at: consumed_raw.map(|s| s.parse::<DateTime<Utc>>()).transpose().map_err(|e| cmdb_infra_db::DbError::MappingError(e.to_string()))?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::AppState;
    use cmdb_infra_db::Store;

    #[tokio::test]
    async fn self_approval_is_rejected_with_conflict() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let state = AppState::new(store, Config::load_from_env());

        let body = json!({"owner": "x"});
        let hash = canonical_payload_hash(Some(&body));
        let approval = create(&state, "POST", "/cis/abc", &hash, &body, None, "operator-p").await.unwrap();

        let err = decide(&state, &approval.id, true, "operator-p", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn bind_then_consume_then_reject_replay() {
        let store = Store::connect(":memory:", None).await.unwrap();
        let state = AppState::new(store, Config::load_from_env());

        let body = json!({"owner": "x"});
        let hash = canonical_payload_hash(Some(&body));
        let approval = create(&state, "POST", "/cis/abc", &hash, &body, None, "operator-p").await.unwrap();
        decide(&state, &approval.id, true, "approver-q", None).await.unwrap();

        let connection = state.store.connection().unwrap();
        let tx = connection.transaction().await.unwrap();
        let now = state.now();
        check_and_consume_tx(&tx, &approval.id, "operator-p", true, "POST", "/cis/abc", &hash, now).await.unwrap();
        tx.commit().await.unwrap();

        let connection = state.store.connection().unwrap();
        let tx = connection.transaction().await.unwrap();
        let err = check_and_consume_tx(&tx, &approval.id, "operator-p", true, "POST", "/cis/abc", &hash, now).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn canonical_hash_ignores_key_order() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 1}});
        let b = json!({"a": {"x": 1, "y": 2}, "b": 1});
        assert_eq!(canonical_payload_hash(Some(&a)), canonical_payload_hash(Some(&b)));
    }

    #[test]
    fn empty_body_hashes_to_fixed_value() {
        let empty = canonical_payload_hash(None);
        assert_eq!(empty, hex::encode(Sha256::digest(b"")));
    }

    #[test]
    fn hash_request_body_matches_parsed_canonical_hash() {
        let body = br#"{"b":1,"a":2}"#;
        let via_bytes = hash_request_body(body, Some("application/json"));
        let via_value = canonical_payload_hash(Some(&json!({"a": 2, "b": 1})));
        assert_eq!(via_bytes, via_value);
    }

    #[test]
    fn hash_request_body_falls_back_for_non_json() {
        let body = b"not json";
        assert_eq!(hash_request_body(body, Some("text/plain")), hex::encode(Sha256::digest(body)));
    }

    #[test]
    fn different_payloads_hash_differently() {
        let a = json!({"name": "router-1"});
        let b = json!({"name": "router-2"});
        assert_ne!(canonical_payload_hash(Some(&a)), canonical_payload_hash(Some(&b)));
    }

    proptest::proptest! {
        #[test]
        fn canonical_hash_is_stable_across_repeated_hashing(
            name in "[a-z]{1,12}",
            owner in "[a-z]{1,12}",
            rank in 0i64..1000,
        ) {
            let value = json!({"name": name, "owner": owner, "rank": rank});
            let first = canonical_payload_hash(Some(&value));
            let second = canonical_payload_hash(Some(&value));
            proptest::prop_assert_eq!(first, second);
        }
    }
}
