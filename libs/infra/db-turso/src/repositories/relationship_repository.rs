// [libs/infra/db-turso/src/repositories/relationship_repository.rs]
/*! Relaciones dirigidas `(source_ci_id, target_ci_id, relation_type)`. */

use crate::errors::DbError;
use crate::models::Relationship;
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

pub struct RelationshipRepository;

fn row_to_relationship(row: &Row) -> Result<Relationship, DbError> {
    let created_raw: String = row.get(5).map_err(|e| DbError::MappingError(e.to_string()))?;
    Ok(Relationship {
        id: row.get(0).map_err(|e| DbError::MappingError(e.to_string()))?,
        source_ci_id: row.get(1).map_err(|e| DbError::MappingError(e.to_string()))?,
        target_ci_id: row.get(2).map_err(|e| DbError::MappingError(e.to_string()))?,
        relation_type: row.get(3).map_err(|e| DbError::MappingError(e.to_string()))?,
        source: row.get(4).map_err(|e| DbError::MappingError(e.to_string()))?,
        created_at: created_raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(e.to_string()))?,
    })
}

const SELECT_COLUMNS: &str = "id, source_ci_id, target_ci_id, relation_type, source, created_at";

impl RelationshipRepository {
    #[instrument(skip(connection))]
    pub async fn upsert(
        connection: &Connection,
        source_ci_id: &str,
        target_ci_id: &str,
        relation_type: &str,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<Relationship, DbError> {
        let existing = connection
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM relationships WHERE source_ci_id = ?1 AND target_ci_id = ?2 AND relation_type = ?3"),
                params![source_ci_id, target_ci_id, relation_type],
            )
            .await?
            .next()
            .await?;

        if let Some(row) = existing {
            connection
                .execute(
                    "UPDATE relationships SET source = ?2 WHERE id = ?1",
                    params![row.get::<String>(0).map_err(|e| DbError::MappingError(e.to_string()))?, source],
                )
                .await?;
            let mut rel = row_to_relationship(&row)?;
            rel.source = source.to_string();
            return Ok(rel);
        }

        let id = Uuid::new_v4().to_string();
        connection
            .execute(
                "INSERT INTO relationships (id, source_ci_id, target_ci_id, relation_type, source, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id.clone(), source_ci_id, target_ci_id, relation_type, source, now.to_rfc3339()],
            )
            .await?;
        Ok(Relationship {
            id,
            source_ci_id: source_ci_id.to_string(),
            target_ci_id: target_ci_id.to_string(),
            relation_type: relation_type.to_string(),
            source: source.to_string(),
            created_at: now,
        })
    }

    /// Same upsert, scoped to an in-flight transaction.
    #[instrument(skip(tx))]
    pub async fn upsert_tx(
        tx: &Transaction,
        source_ci_id: &str,
        target_ci_id: &str,
        relation_type: &str,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<Relationship, DbError> {
        let existing = tx
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM relationships WHERE source_ci_id = ?1 AND target_ci_id = ?2 AND relation_type = ?3"),
                params![source_ci_id, target_ci_id, relation_type],
            )
            .await?
            .next()
            .await?;

        if let Some(row) = existing {
            tx.execute(
                "UPDATE relationships SET source = ?2 WHERE id = ?1",
                params![row.get::<String>(0).map_err(|e| DbError::MappingError(e.to_string()))?, source],
            )
            .await?;
            let mut rel = row_to_relationship(&row)?;
            rel.source = source.to_string();
            return Ok(rel);
        }

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO relationships (id, source_ci_id, target_ci_id, relation_type, source, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id.clone(), source_ci_id, target_ci_id, relation_type, source, now.to_rfc3339()],
        )
        .await?;
        Ok(Relationship {
            id,
            source_ci_id: source_ci_id.to_string(),
            target_ci_id: target_ci_id.to_string(),
            relation_type: relation_type.to_string(),
            source: source.to_string(),
            created_at: now,
        })
    }

    #[instrument(skip(connection))]
    pub async fn list_for_ci(connection: &Connection, ci_id: &str) -> Result<Vec<Relationship>, DbError> {
        let mut rows = connection
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM relationships WHERE source_ci_id = ?1 OR target_ci_id = ?1 ORDER BY created_at"),
                params![ci_id],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_relationship(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(connection))]
    pub async fn find_by_id(connection: &Connection, id: &str) -> Result<Option<Relationship>, DbError> {
        let mut rows = connection.query(&format!("SELECT {SELECT_COLUMNS} FROM relationships WHERE id = ?1"), params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_relationship(&row)?)),
            None => Ok(None),
        }
    }

    /// Same lookup, scoped to an in-flight transaction.
    #[instrument(skip(tx))]
    pub async fn find_by_id_tx(tx: &Transaction, id: &str) -> Result<Option<Relationship>, DbError> {
        let mut rows = tx.query(&format!("SELECT {SELECT_COLUMNS} FROM relationships WHERE id = ?1"), params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_relationship(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(connection))]
    pub async fn delete(connection: &Connection, id: &str) -> Result<(), DbError> {
        connection.execute("DELETE FROM relationships WHERE id = ?1", params![id]).await?;
        Ok(())
    }

    #[instrument(skip(tx))]
    pub async fn delete_tx(tx: &Transaction, id: &str) -> Result<(), DbError> {
        tx.execute("DELETE FROM relationships WHERE id = ?1", params![id]).await?;
        Ok(())
    }

    /// Used by `PATCH /relationships/{id}`: the only mutable field besides
    /// the natural key is `relation_type` (re-pointing source/target is
    /// expressed as delete+create).
    #[instrument(skip(connection))]
    pub async fn update_relation_type(connection: &Connection, id: &str, relation_type: &str) -> Result<(), DbError> {
        connection.execute("UPDATE relationships SET relation_type = ?2 WHERE id = ?1", params![id, relation_type]).await?;
        Ok(())
    }

    #[instrument(skip(tx))]
    pub async fn update_relation_type_tx(tx: &Transaction, id: &str, relation_type: &str) -> Result<(), DbError> {
        tx.execute("UPDATE relationships SET relation_type = ?2 WHERE id = ?1", params![id, relation_type]).await?;
        Ok(())
    }

    #[instrument(skip(connection))]
    pub async fn list_all(connection: &Connection) -> Result<Vec<Relationship>, DbError> {
        let mut rows = connection.query(&format!("SELECT {SELECT_COLUMNS} FROM relationships ORDER BY created_at DESC LIMIT 500"), ()).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_relationship(&row)?);
        }
        Ok(out)
    }
}
