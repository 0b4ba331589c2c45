// [apps/orchestrator/src/services/audit_log.rs]
//! Thin wrapper over `cmdb_infra_db::AuditRepository` that doubles every
//! persisted event as a `tracing::info!` span (SPEC_FULL §10.2), so log
//! aggregation and the audit trail agree on vocabulary without the
//! services needing to remember to do both separately.

use chrono::{DateTime, Utc};
use cmdb_infra_db::{repositories::AuditRepository, DbError};
use libsql::{Connection, Transaction};
use serde_json::Value as Json;
use tracing::info;

pub async fn record_tx(tx: &Transaction, ci_id: Option<&str>, event_type: &str, payload: &Json, now: DateTime<Utc>) -> Result<(), DbError> {
    AuditRepository::append_tx(tx, ci_id, event_type, payload, now).await?;
    info!(target: "audit", event_type, ci_id = ci_id.unwrap_or("-"), payload = %payload, "audit event recorded");
    Ok(())
}

/// Connection-scoped commit, used by the queue/scheduler per §5
/// Transactionality: job state transitions commit independently of the
/// job's own payload transaction.
pub async fn record(connection: &Connection, ci_id: Option<&str>, event_type: &str, payload: &Json, now: DateTime<Utc>) -> Result<(), DbError> {
    AuditRepository::append(connection, ci_id, event_type, payload, now).await?;
    info!(target: "audit", event_type, ci_id = ci_id.unwrap_or("-"), payload = %payload, "audit event recorded");
    Ok(())
}
