// [libs/infra/db-turso/src/repositories/collision_repository.rs]
/*!
 * Colisiones de gobernanza: a lo sumo una fila OPEN por cuadruple
 * `(scheme, value, existing_ci_id, incoming_ci_id)`.
 */

use crate::errors::DbError;
use crate::models::{CollisionStatus, GovernanceCollision};
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

pub struct CollisionRepository;

fn row_to_collision(row: &Row) -> Result<GovernanceCollision, DbError> {
    let created_raw: String = row.get(8).map_err(|e| DbError::MappingError(e.to_string()))?;
    let resolved_raw: Option<String> = row.get(7).map_err(|e| DbError::MappingError(e.to_string()))?;
    Ok(GovernanceCollision {
        id: row.get(0).map_err(|e| DbError::MappingError(e.to_string()))?,
        scheme: row.get(1).map_err(|e| DbError::MappingError(e.to_string()))?,
        value: row.get(2).map_err(|e| DbError::MappingError(e.to_string()))?,
        existing_ci_id: row.get(3).map_err(|e| DbError::MappingError(e.to_string()))?,
        incoming_ci_id: row.get(4).map_err(|e| DbError::MappingError(e.to_string()))?,
        status: CollisionStatus::parse(&row.get::<String>(5).map_err(|e| DbError::MappingError(e.to_string()))?),
        resolution_note: row.get(6).map_err(|e| DbError::MappingError(e.to_string()))?,
        resolved_at: resolved_raw.map(|s| s.parse::<DateTime<Utc>>()).transpose().map_err(|e| DbError::MappingError(e.to_string()))?,
        created_at: created_raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(e.to_string()))?,
    })
}

const SELECT_COLUMNS: &str = "id, scheme, value, existing_ci_id, incoming_ci_id, status, resolution_note, resolved_at, created_at";

impl CollisionRepository {
    /// Crea una colision OPEN para el cuadruple, a menos que ya exista una.
    /// Devuelve `true` si se inserto una fila nueva (idempotente en OPEN).
    #[instrument(skip(tx))]
    pub async fn record_open(
        tx: &Transaction,
        scheme: &str,
        value: &str,
        existing_ci_id: &str,
        incoming_ci_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let already_open = tx
            .query(
                "SELECT id FROM governance_collisions WHERE scheme = ?1 AND value = ?2 AND existing_ci_id = ?3 AND incoming_ci_id = ?4 AND status = 'OPEN'",
                params![scheme, value, existing_ci_id, incoming_ci_id],
            )
            .await?
            .next()
            .await?
            .is_some();

        if already_open {
            return Ok(false);
        }

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO governance_collisions (id, scheme, value, existing_ci_id, incoming_ci_id, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 'OPEN', ?6)",
            params![id, scheme, value, existing_ci_id, incoming_ci_id, now.to_rfc3339()],
        )
        .await?;
        Ok(true)
    }

    #[instrument(skip(connection))]
    pub async fn find_by_id(connection: &Connection, id: &str) -> Result<Option<GovernanceCollision>, DbError> {
        let mut rows = connection.query(&format!("SELECT {SELECT_COLUMNS} FROM governance_collisions WHERE id = ?1"), params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_collision(&row)?)),
            None => Ok(None),
        }
    }

    /// Same lookup, scoped to an in-flight transaction.
    #[instrument(skip(tx))]
    pub async fn find_by_id_tx(tx: &Transaction, id: &str) -> Result<Option<GovernanceCollision>, DbError> {
        let mut rows = tx.query(&format!("SELECT {SELECT_COLUMNS} FROM governance_collisions WHERE id = ?1"), params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_collision(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(connection))]
    pub async fn list(connection: &Connection, status: Option<&str>) -> Result<Vec<GovernanceCollision>, DbError> {
        let mut rows = match status {
            Some(s) => {
                connection
                    .query(
                        &format!("SELECT {SELECT_COLUMNS} FROM governance_collisions WHERE status = ?1 ORDER BY created_at DESC"),
                        params![s],
                    )
                    .await?
            }
            None => connection.query(&format!("SELECT {SELECT_COLUMNS} FROM governance_collisions ORDER BY created_at DESC"), ()).await?,
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_collision(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(connection))]
    pub async fn resolve(connection: &Connection, id: &str, note: Option<&str>, now: DateTime<Utc>) -> Result<(), DbError> {
        connection
            .execute(
                "UPDATE governance_collisions SET status = 'RESOLVED', resolution_note = ?2, resolved_at = ?3 WHERE id = ?1",
                params![id, note, now.to_rfc3339()],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(tx))]
    pub async fn resolve_tx(tx: &Transaction, id: &str, note: Option<&str>, now: DateTime<Utc>) -> Result<(), DbError> {
        tx.execute(
            "UPDATE governance_collisions SET status = 'RESOLVED', resolution_note = ?2, resolved_at = ?3 WHERE id = ?1",
            params![id, note, now.to_rfc3339()],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(connection))]
    pub async fn reopen(connection: &Connection, id: &str) -> Result<(), DbError> {
        connection
            .execute(
                "UPDATE governance_collisions SET status = 'OPEN', resolution_note = NULL, resolved_at = NULL WHERE id = ?1",
                params![id],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(tx))]
    pub async fn reopen_tx(tx: &Transaction, id: &str) -> Result<(), DbError> {
        tx.execute(
            "UPDATE governance_collisions SET status = 'OPEN', resolution_note = NULL, resolved_at = NULL WHERE id = ?1",
            params![id],
        )
        .await?;
        Ok(())
    }
}
