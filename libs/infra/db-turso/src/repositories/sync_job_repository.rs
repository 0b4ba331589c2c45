// [libs/infra/db-turso/src/repositories/sync_job_repository.rs]
/*!
 * Cola de jobs DB-backed. `claim` implementa una actualizacion condicional
 * single-writer-safe: si la fila ya no esta QUEUED, la sentencia afecta
 * cero filas y el llamador debe ceder (otro worker gano la carrera).
 */

use crate::errors::DbError;
use crate::models::{JobStatus, SyncJob};
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row, Transaction};
use serde_json::Value as Json;
use tracing::instrument;
use uuid::Uuid;

pub struct SyncJobRepository;

const SELECT_COLUMNS: &str = "id, job_type, status, requested_by, payload, result, last_error, attempt_count, max_attempts, next_run_at, started_at, finished_at, created_at, updated_at";

fn row_to_job(row: &Row) -> Result<SyncJob, DbError> {
    let payload_raw: String = row.get(4).map_err(|e| DbError::MappingError(e.to_string()))?;
    let result_raw: Option<String> = row.get(5).map_err(|e| DbError::MappingError(e.to_string()))?;
    let next_run_raw: String = row.get(9).map_err(|e| DbError::MappingError(e.to_string()))?;
    let started_raw: Option<String> = row.get(10).map_err(|e| DbError::MappingError(e.to_string()))?;
    let finished_raw: Option<String> = row.get(11).map_err(|e| DbError::MappingError(e.to_string()))?;
    let created_raw: String = row.get(12).map_err(|e| DbError::MappingError(e.to_string()))?;
    let updated_raw: String = row.get(13).map_err(|e| DbError::MappingError(e.to_string()))?;

    Ok(SyncJob {
        id: row.get(0).map_err(|e| DbError::MappingError(e.to_string()))?,
        job_type: row.get(1).map_err(|e| DbError::MappingError(e.to_string()))?,
        status: JobStatus::parse(&row.get::<String>(2).map_err(|e| DbError::MappingError(e.to_string()))?),
        requested_by: row.get(3).map_err(|e| DbError::MappingError(e.to_string()))?,
        payload: serde_json::from_str(&payload_raw).unwrap_or(Json::Null),
        result: result_raw.and_then(|r| serde_json::from_str(&r).ok()),
        last_error: row.get(6).map_err(|e| DbError::MappingError(e.to_string()))?,
        attempt_count: row.get(7).map_err(|e| DbError::MappingError(e.to_string()))?,
        max_attempts: row.get(8).map_err(|e| DbError::MappingError(e.to_string()))?,
        next_run_at: next_run_raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(e.to_string()))?,
        started_at: started_raw.map(|s| s.parse::<DateTime<Utc>>()).transpose().map_err(|e| DbError::MappingError(e.to_string()))?,
        finished_at: finished_raw.map(|s| s.parse::<DateTime<Utc>>()).transpose().map_err(|e| DbError::MappingError(e.to_string()))?,
        created_at: created_raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(e.to_string()))?,
        updated_at: updated_raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(e.to_string()))?,
    })
}

impl SyncJobRepository {
    #[instrument(skip(connection, payload))]
    pub async fn enqueue(
        connection: &Connection,
        job_type: &str,
        requested_by: &str,
        payload: &Json,
        max_attempts: i64,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SyncJob, DbError> {
        let id = Uuid::new_v4().to_string();
        connection
            .execute(
                "INSERT INTO sync_jobs (id, job_type, status, requested_by, payload, attempt_count, max_attempts, next_run_at, created_at, updated_at) \
                 VALUES (?1, ?2, 'QUEUED', ?3, ?4, 0, ?5, ?6, ?7, ?7)",
                params![id.clone(), job_type, requested_by, payload.to_string(), max_attempts, next_run_at.to_rfc3339(), now.to_rfc3339()],
            )
            .await?;
        Ok(SyncJob {
            id,
            job_type: job_type.to_string(),
            status: JobStatus::Queued,
            requested_by: requested_by.to_string(),
            payload: payload.clone(),
            result: None,
            last_error: None,
            attempt_count: 0,
            max_attempts,
            next_run_at,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Same insert, scoped to an in-flight transaction.
    #[instrument(skip(tx, payload))]
    pub async fn enqueue_tx(
        tx: &Transaction,
        job_type: &str,
        requested_by: &str,
        payload: &Json,
        max_attempts: i64,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SyncJob, DbError> {
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO sync_jobs (id, job_type, status, requested_by, payload, attempt_count, max_attempts, next_run_at, created_at, updated_at) \
             VALUES (?1, ?2, 'QUEUED', ?3, ?4, 0, ?5, ?6, ?7, ?7)",
            params![id.clone(), job_type, requested_by, payload.to_string(), max_attempts, next_run_at.to_rfc3339(), now.to_rfc3339()],
        )
        .await?;
        Ok(SyncJob {
            id,
            job_type: job_type.to_string(),
            status: JobStatus::Queued,
            requested_by: requested_by.to_string(),
            payload: payload.clone(),
            result: None,
            last_error: None,
            attempt_count: 0,
            max_attempts,
            next_run_at,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Reclama el job QUEUED mas antiguo cuyo `next_run_at <= now`. Devuelve
    /// `None` si no hay trabajo disponible o si otro worker lo reclamo primero.
    #[instrument(skip(connection))]
    pub async fn claim_next(connection: &Connection, now: DateTime<Utc>) -> Result<Option<SyncJob>, DbError> {
        let candidate = connection
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM sync_jobs WHERE status = 'QUEUED' AND next_run_at <= ?1 ORDER BY next_run_at ASC LIMIT 1"),
                params![now.to_rfc3339()],
            )
            .await?
            .next()
            .await?;

        let Some(row) = candidate else { return Ok(None) };
        let job = row_to_job(&row)?;

        let affected = connection
            .execute(
                "UPDATE sync_jobs SET status = 'RUNNING', attempt_count = attempt_count + 1, started_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND status = 'QUEUED'",
                params![job.id.clone(), now.to_rfc3339()],
            )
            .await?;

        if affected == 0 {
            // otro worker gano la carrera de reclamacion
            return Ok(None);
        }

        Ok(Some(SyncJob { status: JobStatus::Running, attempt_count: job.attempt_count + 1, started_at: Some(now), updated_at: now, ..job }))
    }

    #[instrument(skip(connection, result))]
    pub async fn mark_succeeded(connection: &Connection, id: &str, result: &Json, now: DateTime<Utc>) -> Result<(), DbError> {
        connection
            .execute(
                "UPDATE sync_jobs SET status = 'SUCCEEDED', result = ?2, last_error = NULL, finished_at = ?3, updated_at = ?3 WHERE id = ?1",
                params![id, result.to_string(), now.to_rfc3339()],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(connection))]
    pub async fn mark_retry(connection: &Connection, id: &str, error_slug: &str, next_run_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), DbError> {
        connection
            .execute(
                "UPDATE sync_jobs SET status = 'QUEUED', last_error = ?2, next_run_at = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, error_slug, next_run_at.to_rfc3339(), now.to_rfc3339()],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(connection))]
    pub async fn mark_failed(connection: &Connection, id: &str, error_slug: &str, now: DateTime<Utc>) -> Result<(), DbError> {
        connection
            .execute(
                "UPDATE sync_jobs SET status = 'FAILED', last_error = ?2, finished_at = ?3, updated_at = ?3 WHERE id = ?1",
                params![id, error_slug, now.to_rfc3339()],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(connection))]
    pub async fn find_by_id(connection: &Connection, id: &str) -> Result<Option<SyncJob>, DbError> {
        let mut rows = connection.query(&format!("SELECT {SELECT_COLUMNS} FROM sync_jobs WHERE id = ?1"), params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(connection))]
    pub async fn list_recent(connection: &Connection, limit: i64) -> Result<Vec<SyncJob>, DbError> {
        let mut rows = connection.query(&format!("SELECT {SELECT_COLUMNS} FROM sync_jobs ORDER BY created_at DESC LIMIT ?1"), params![limit]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_job(&row)?);
        }
        Ok(out)
    }

    /// Usado por el scheduler para evitar encolar un duplicado mientras un
    /// job del mismo tipo disparado por "scheduler" sigue en vuelo.
    #[instrument(skip(connection))]
    pub async fn has_inflight(connection: &Connection, job_type: &str, requested_by: &str) -> Result<bool, DbError> {
        let found = connection
            .query(
                "SELECT id FROM sync_jobs WHERE job_type = ?1 AND requested_by = ?2 AND status IN ('QUEUED', 'RUNNING') LIMIT 1",
                params![job_type, requested_by],
            )
            .await?
            .next()
            .await?
            .is_some();
        Ok(found)
    }
}
