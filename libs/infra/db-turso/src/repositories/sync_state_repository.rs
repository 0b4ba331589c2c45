// [libs/infra/db-turso/src/repositories/sync_state_repository.rs]
/*! K/V de watermarks y timestamps de proximo disparo de schedule. */

use crate::errors::DbError;
use chrono::{DateTime, Utc};
use libsql::{params, Connection};
use tracing::instrument;

pub struct SyncStateRepository;

impl SyncStateRepository {
    #[instrument(skip(connection))]
    pub async fn get(connection: &Connection, key: &str) -> Result<Option<String>, DbError> {
        let mut rows = connection.query("SELECT value FROM sync_state WHERE key = ?1", params![key]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0).map_err(|e| DbError::MappingError(e.to_string()))?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(connection))]
    pub async fn get_timestamp(connection: &Connection, key: &str) -> Result<Option<DateTime<Utc>>, DbError> {
        match Self::get(connection, key).await? {
            Some(raw) => Ok(Some(raw.parse::<DateTime<Utc>>().map_err(|e| DbError::MappingError(e.to_string()))?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(connection))]
    pub async fn set(connection: &Connection, key: &str, value: &str, now: DateTime<Utc>) -> Result<(), DbError> {
        connection
            .execute(
                "INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now.to_rfc3339()],
            )
            .await?;
        Ok(())
    }
}
