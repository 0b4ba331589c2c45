// [libs/infra/db-turso/src/repositories/identity_repository.rs]
/*! Identidades: `(scheme, value)` globalmente unico, cada una atada a una CI. */

use crate::errors::DbError;
use crate::models::Identity;
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

pub struct IdentityRepository;

fn row_to_identity(row: &Row) -> Result<Identity, DbError> {
    let created_raw: String = row.get(4).map_err(|e| DbError::MappingError(e.to_string()))?;
    Ok(Identity {
        id: row.get(0).map_err(|e| DbError::MappingError(e.to_string()))?,
        ci_id: row.get(1).map_err(|e| DbError::MappingError(e.to_string()))?,
        scheme: row.get(2).map_err(|e| DbError::MappingError(e.to_string()))?,
        value: row.get(3).map_err(|e| DbError::MappingError(e.to_string()))?,
        created_at: created_raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(e.to_string()))?,
    })
}

impl IdentityRepository {
    /// Same lookup, scoped to an in-flight transaction so reconciliation
    /// sees its own uncommitted writes (e.g. an identity bound earlier in
    /// the same payload).
    #[instrument(skip(tx))]
    pub async fn find_owner_tx(tx: &Transaction, scheme: &str, value: &str) -> Result<Option<Identity>, DbError> {
        let mut rows = tx
            .query(
                "SELECT id, ci_id, scheme, value, created_at FROM identities WHERE scheme = ?1 AND value = ?2",
                params![scheme, value],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_identity(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(tx))]
    pub async fn create(tx: &Transaction, ci_id: &str, scheme: &str, value: &str, now: DateTime<Utc>) -> Result<Identity, DbError> {
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO identities (id, ci_id, scheme, value, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.clone(), ci_id, scheme, value, now.to_rfc3339()],
        )
        .await?;
        Ok(Identity { id, ci_id: ci_id.to_string(), scheme: scheme.to_string(), value: value.to_string(), created_at: now })
    }

    #[instrument(skip(connection))]
    pub async fn list_for_ci(connection: &Connection, ci_id: &str) -> Result<Vec<Identity>, DbError> {
        let mut rows = connection
            .query("SELECT id, ci_id, scheme, value, created_at FROM identities WHERE ci_id = ?1 ORDER BY created_at", params![ci_id])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_identity(&row)?);
        }
        Ok(out)
    }
}
