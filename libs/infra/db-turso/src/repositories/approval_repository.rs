// [libs/infra/db-turso/src/repositories/approval_repository.rs]
/*! Maker-checker: ata una aprobacion a una peticion mutante exacta. */

use crate::errors::DbError;
use crate::models::{ApprovalStatus, ChangeApproval};
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row, Transaction};
use serde_json::Value as Json;
use tracing::instrument;
use uuid::Uuid;

pub struct ApprovalRepository;

const SELECT_COLUMNS: &str = "id, method, request_path, payload_hash, payload_preview, reason, requested_by, status, decided_by, decision_note, created_at, expires_at, decided_at, consumed_at";

fn row_to_approval(row: &Row) -> Result<ChangeApproval, DbError> {
    let preview_raw: String = row.get(4).map_err(|e| DbError::MappingError(e.to_string()))?;
    let created_raw: String = row.get(10).map_err(|e| DbError::MappingError(e.to_string()))?;
    let expires_raw: String = row.get(11).map_err(|e| DbError::MappingError(e.to_string()))?;
    let decided_raw: Option<String> = row.get(12).map_err(|e| DbError::MappingError(e.to_string()))?;
    let consumed_raw: Option<String> = row.get(13).map_err(|e| DbError::MappingError(e.to_string()))?;

    Ok(ChangeApproval {
        id: row.get(0).map_err(|e| DbError::MappingError(e.to_string()))?,
        method: row.get(1).map_err(|e| DbError::MappingError(e.to_string()))?,
        request_path: row.get(2).map_err(|e| DbError::MappingError(e.to_string()))?,
        payload_hash: row.get(3).map_err(|e| DbError::MappingError(e.to_string()))?,
        payload_preview: serde_json::from_str(&preview_raw).unwrap_or(Json::Null),
        reason: row.get(5).map_err(|e| DbError::MappingError(e.to_string()))?,
        requested_by: row.get(6).map_err(|e| DbError::MappingError(e.to_string()))?,
        status: ApprovalStatus::parse(&row.get::<String>(7).map_err(|e| DbError::MappingError(e.to_string()))?),
        decided_by: row.get(8).map_err(|e| DbError::MappingError(e.to_string()))?,
        decision_note: row.get(9).map_err(|e| DbError::MappingError(e.to_string()))?,
        created_at: created_raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(e.to_string()))?,
        expires_at: expires_raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(e.to_string()))?,
        decided_at: decided_raw.map(|s| s.parse::<DateTime<Utc>>()).transpose().map_err(|e| DbError::MappingError(e.to_string()))?,
        consumed_at: consumed_raw.map(|s| s.parse::<DateTime<Utc>>()).transpose().map_err(|e| DbError::MappingError(e.to_string()))?,
    })
}

impl ApprovalRepository {
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(connection, payload_preview, reason))]
    pub async fn create(
        connection: &Connection,
        method: &str,
        request_path: &str,
        payload_hash: &str,
        payload_preview: &Json,
        reason: Option<&str>,
        requested_by: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ChangeApproval, DbError> {
        let id = Uuid::new_v4().to_string();
        connection
            .execute(
                "INSERT INTO change_approvals (id, method, request_path, payload_hash, payload_preview, reason, requested_by, status, created_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'PENDING', ?8, ?9)",
                params![
                    id.clone(),
                    method,
                    request_path,
                    payload_hash,
                    payload_preview.to_string(),
                    reason,
                    requested_by,
                    now.to_rfc3339(),
                    expires_at.to_rfc3339()
                ],
            )
            .await?;
        Ok(ChangeApproval {
            id,
            method: method.to_string(),
            request_path: request_path.to_string(),
            payload_hash: payload_hash.to_string(),
            payload_preview: payload_preview.clone(),
            reason: reason.map(String::from),
            requested_by: requested_by.to_string(),
            status: ApprovalStatus::Pending,
            decided_by: None,
            decision_note: None,
            created_at: now,
            expires_at,
            decided_at: None,
            consumed_at: None,
        })
    }

    #[instrument(skip(connection))]
    pub async fn find_by_id(connection: &Connection, id: &str) -> Result<Option<ChangeApproval>, DbError> {
        let mut rows = connection.query(&format!("SELECT {SELECT_COLUMNS} FROM change_approvals WHERE id = ?1"), params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_approval(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(connection))]
    pub async fn list(connection: &Connection, limit: i64) -> Result<Vec<ChangeApproval>, DbError> {
        let mut rows = connection.query(&format!("SELECT {SELECT_COLUMNS} FROM change_approvals ORDER BY created_at DESC LIMIT ?1"), params![limit]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_approval(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(connection))]
    pub async fn decide(connection: &Connection, id: &str, approved: bool, decided_by: &str, note: Option<&str>, now: DateTime<Utc>) -> Result<(), DbError> {
        let status = if approved { "APPROVED" } else { "REJECTED" };
        connection
            .execute(
                "UPDATE change_approvals SET status = ?2, decided_by = ?3, decision_note = ?4, decided_at = ?5 WHERE id = ?1",
                params![id, status, decided_by, note, now.to_rfc3339()],
            )
            .await?;
        Ok(())
    }

    /// Consume la aprobacion dentro de la transaccion del handler mutante que
    /// ella protege, para que CONSUMED solo se comprometa junto al cambio real.
    #[instrument(skip(tx))]
    pub async fn consume_tx(tx: &Transaction, id: &str, now: DateTime<Utc>) -> Result<(), DbError> {
        tx.execute("UPDATE change_approvals SET status = 'CONSUMED', consumed_at = ?2 WHERE id = ?1", params![id, now.to_rfc3339()]).await?;
        Ok(())
    }

    /// Marca como REJECTED todas las PENDING vencidas en una sola sentencia.
    /// Devuelve el numero de filas afectadas.
    #[instrument(skip(connection))]
    pub async fn sweep_expired(connection: &Connection, now: DateTime<Utc>) -> Result<u64, DbError> {
        let affected = connection
            .execute(
                "UPDATE change_approvals SET status = 'REJECTED', decided_by = 'system:approval-cleaner', decided_at = ?1 \
                 WHERE status = 'PENDING' AND expires_at <= ?1",
                params![now.to_rfc3339()],
            )
            .await?;
        Ok(affected)
    }
}
