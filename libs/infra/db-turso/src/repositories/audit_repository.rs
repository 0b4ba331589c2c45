// [libs/infra/db-turso/src/repositories/audit_repository.rs]
/*!
 * Log de auditoria append-only. `append` se invoca siempre dentro de la
 * transaccion del handler que produce el evento, de modo que el evento se
 * vuelve visible atomicamente con el commit de esa transaccion.
 */

use crate::errors::DbError;
use crate::models::AuditEvent;
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row, Transaction};
use serde_json::Value as Json;
use tracing::instrument;
use uuid::Uuid;

pub struct AuditRepository;

fn row_to_event(row: &Row) -> Result<AuditEvent, DbError> {
    let payload_raw: String = row.get(3).map_err(|e| DbError::MappingError(e.to_string()))?;
    let created_raw: String = row.get(4).map_err(|e| DbError::MappingError(e.to_string()))?;
    Ok(AuditEvent {
        id: row.get(0).map_err(|e| DbError::MappingError(e.to_string()))?,
        ci_id: row.get(1).map_err(|e| DbError::MappingError(e.to_string()))?,
        event_type: row.get(2).map_err(|e| DbError::MappingError(e.to_string()))?,
        payload: serde_json::from_str(&payload_raw).unwrap_or(Json::Null),
        created_at: created_raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(e.to_string()))?,
    })
}

impl AuditRepository {
    /// Variante transaccional: usada por reconciliador/gobernanza/approval-gate
    /// para que el evento comparta atomicidad con la mutacion que lo origina.
    #[instrument(skip(tx, payload))]
    pub async fn append_tx(tx: &Transaction, ci_id: Option<&str>, event_type: &str, payload: &Json, now: DateTime<Utc>) -> Result<(), DbError> {
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO audit_events (id, ci_id, event_type, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, ci_id, event_type, payload.to_string(), now.to_rfc3339()],
        )
        .await?;
        Ok(())
    }

    /// Variante fuera de transaccion: usada por la cola de jobs, cuyas
    /// transiciones de estado comprometen independientemente del payload
    /// de la propia tarea (ver §5 Transactionality).
    #[instrument(skip(connection, payload))]
    pub async fn append(connection: &Connection, ci_id: Option<&str>, event_type: &str, payload: &Json, now: DateTime<Utc>) -> Result<(), DbError> {
        let id = Uuid::new_v4().to_string();
        connection
            .execute(
                "INSERT INTO audit_events (id, ci_id, event_type, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, ci_id, event_type, payload.to_string(), now.to_rfc3339()],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(connection))]
    pub async fn list_for_ci(connection: &Connection, ci_id: &str) -> Result<Vec<AuditEvent>, DbError> {
        let mut rows = connection
            .query(
                "SELECT id, ci_id, event_type, payload, created_at FROM audit_events WHERE ci_id = ?1 ORDER BY created_at DESC",
                params![ci_id],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_event(&row)?);
        }
        Ok(out)
    }

    /// Usado por `GET /audit/export` (NDJSON, mas reciente primero).
    #[instrument(skip(connection))]
    pub async fn export_recent(connection: &Connection, limit: i64) -> Result<Vec<AuditEvent>, DbError> {
        let mut rows = connection
            .query("SELECT id, ci_id, event_type, payload, created_at FROM audit_events ORDER BY created_at DESC LIMIT ?1", params![limit])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_event(&row)?);
        }
        Ok(out)
    }
}
