// [libs/infra/db-turso/src/repositories/ci_repository.rs]
/*!
 * Repositorio de Configuration Items. Expone el acceso tipado que el
 * reconciliador (orchestrator) necesita para el upsert identity-keyed:
 * buscar por identidad, insertar, y sobreescribir campos bajo precedencia.
 */

use crate::errors::DbError;
use crate::models::{Ci, CiStatus};
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row, Transaction};
use serde_json::Value as Json;
use tracing::instrument;

pub struct CiRepository;

fn row_to_ci(row: &Row) -> Result<Ci, DbError> {
    let attributes_raw: String = row.get(6).map_err(|e| DbError::MappingError(e.to_string()))?;
    Ok(Ci {
        id: row.get(0).map_err(|e| DbError::MappingError(e.to_string()))?,
        name: row.get(1).map_err(|e| DbError::MappingError(e.to_string()))?,
        ci_type: row.get(2).map_err(|e| DbError::MappingError(e.to_string()))?,
        source: row.get(3).map_err(|e| DbError::MappingError(e.to_string()))?,
        owner: row.get(4).map_err(|e| DbError::MappingError(e.to_string()))?,
        status: CiStatus::parse(&row.get::<String>(5).map_err(|e| DbError::MappingError(e.to_string()))?),
        attributes: serde_json::from_str(&attributes_raw).unwrap_or(Json::Null),
        last_seen_at: parse_ts(&row, 7)?,
        created_at: parse_ts(&row, 8)?,
        updated_at: parse_ts(&row, 9)?,
    })
}

fn parse_ts(row: &Row, idx: i32) -> Result<DateTime<Utc>, DbError> {
    let raw: String = row.get(idx).map_err(|e| DbError::MappingError(e.to_string()))?;
    raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(format!("timestamp {raw}: {e}")))
}

const SELECT_COLUMNS: &str = "id, name, ci_type, source, owner, status, attributes, last_seen_at, created_at, updated_at";

impl CiRepository {
    #[instrument(skip(connection))]
    pub async fn find_by_id(connection: &Connection, id: &str) -> Result<Option<Ci>, DbError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM cis WHERE id = ?1");
        let mut rows = connection.query(&sql, params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_ci(&row)?)),
            None => Ok(None),
        }
    }

    /// Same lookup, scoped to an in-flight transaction.
    #[instrument(skip(tx))]
    pub async fn find_by_id_tx(tx: &Transaction, id: &str) -> Result<Option<Ci>, DbError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM cis WHERE id = ?1");
        let mut rows = tx.query(&sql, params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_ci(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(tx))]
    pub async fn insert(tx: &Transaction, ci: &Ci) -> Result<(), DbError> {
        tx.execute(
            "INSERT INTO cis (id, name, ci_type, source, owner, status, attributes, last_seen_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                ci.id.clone(),
                ci.name.clone(),
                ci.ci_type.clone(),
                ci.source.clone(),
                ci.owner.clone(),
                ci.status.as_str(),
                ci.attributes.to_string(),
                ci.last_seen_at.to_rfc3339(),
                ci.created_at.to_rfc3339(),
                ci.updated_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(tx))]
    pub async fn update(tx: &Transaction, ci: &Ci) -> Result<(), DbError> {
        tx.execute(
            "UPDATE cis SET name = ?2, ci_type = ?3, source = ?4, owner = ?5, status = ?6, \
             attributes = ?7, last_seen_at = ?8, updated_at = ?9 WHERE id = ?1",
            params![
                ci.id.clone(),
                ci.name.clone(),
                ci.ci_type.clone(),
                ci.source.clone(),
                ci.owner.clone(),
                ci.status.as_str(),
                ci.attributes.to_string(),
                ci.last_seen_at.to_rfc3339(),
                ci.updated_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Usado exclusivamente por el motor de lifecycle para aplicar una
    /// transicion de estado sin tocar el resto de los campos.
    #[instrument(skip(connection))]
    pub async fn set_status(connection: &Connection, id: &str, status: CiStatus, updated_at: DateTime<Utc>) -> Result<(), DbError> {
        connection
            .execute(
                "UPDATE cis SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), updated_at.to_rfc3339()],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(tx))]
    pub async fn set_status_tx(tx: &Transaction, id: &str, status: CiStatus, updated_at: DateTime<Utc>) -> Result<(), DbError> {
        tx.execute("UPDATE cis SET status = ?2, updated_at = ?3 WHERE id = ?1", params![id, status.as_str(), updated_at.to_rfc3339()]).await?;
        Ok(())
    }

    #[instrument(skip(connection))]
    pub async fn delete(connection: &Connection, id: &str) -> Result<(), DbError> {
        connection.execute("DELETE FROM cis WHERE id = ?1", params![id]).await?;
        Ok(())
    }

    /// Listado paginado usado por el lifecycle engine (batch size 1000) y por
    /// el endpoint de listado con filtros.
    #[instrument(skip(connection))]
    pub async fn list_page(connection: &Connection, offset: i64, limit: i64) -> Result<Vec<Ci>, DbError> {
        let mut rows = connection
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM cis ORDER BY id LIMIT ?1 OFFSET ?2"),
                params![limit, offset],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_ci(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(connection))]
    pub async fn list_filtered(
        connection: &Connection,
        status: Option<&str>,
        source: Option<&str>,
        owner: Option<&str>,
    ) -> Result<Vec<Ci>, DbError> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM cis WHERE 1=1");
        let mut bound: Vec<libsql::Value> = Vec::new();
        if let Some(s) = status {
            bound.push(libsql::Value::Text(s.to_string()));
            sql.push_str(&format!(" AND status = ?{}", bound.len()));
        }
        if let Some(s) = source {
            bound.push(libsql::Value::Text(s.to_string()));
            sql.push_str(&format!(" AND source = ?{}", bound.len()));
        }
        if let Some(o) = owner {
            bound.push(libsql::Value::Text(o.to_string()));
            sql.push_str(&format!(" AND owner = ?{}", bound.len()));
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT 500");

        let mut rows = connection.query(&sql, bound).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_ci(&row)?);
        }
        Ok(out)
    }

    /// Un CI es huerfano si su id no aparece en ninguna relacion.
    #[instrument(skip(connection))]
    pub async fn find_orphans(connection: &Connection, offset: i64, limit: i64) -> Result<Vec<Ci>, DbError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM cis WHERE id NOT IN (SELECT source_ci_id FROM relationships UNION SELECT target_ci_id FROM relationships) \
             ORDER BY id LIMIT ?1 OFFSET ?2"
        );
        let mut rows = connection.query(&sql, params![limit, offset]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_ci(&row)?);
        }
        Ok(out)
    }

    /// Same paged listing and orphan scan, scoped to an in-flight
    /// transaction (used by the lifecycle engine so its whole pass shares
    /// one transaction with the approval gate's consume).
    #[instrument(skip(tx))]
    pub async fn list_page_tx(tx: &Transaction, offset: i64, limit: i64) -> Result<Vec<Ci>, DbError> {
        let mut rows = tx.query(&format!("SELECT {SELECT_COLUMNS} FROM cis ORDER BY id LIMIT ?1 OFFSET ?2"), params![limit, offset]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_ci(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(tx))]
    pub async fn find_orphans_tx(tx: &Transaction, offset: i64, limit: i64) -> Result<Vec<Ci>, DbError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM cis WHERE id NOT IN (SELECT source_ci_id FROM relationships UNION SELECT target_ci_id FROM relationships) \
             ORDER BY id LIMIT ?1 OFFSET ?2"
        );
        let mut rows = tx.query(&sql, params![limit, offset]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_ci(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(connection))]
    pub async fn count(connection: &Connection) -> Result<i64, DbError> {
        let mut rows = connection.query("SELECT COUNT(*) FROM cis", ()).await?;
        let row = rows.next().await?.ok_or_else(|| DbError::MappingError("count row missing".into()))?;
        row.get(0).map_err(|e| DbError::MappingError(e.to_string()))
    }
}
