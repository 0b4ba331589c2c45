// [libs/infra/db-turso/src/client.rs]
/*!
 * =================================================================
 * APARATO: DATABASE CONNECTION CLIENT (V1.0)
 * CLASIFICACION: INFRASTRUCTURE LAYER (ESTRATO L3)
 * RESPONSABILIDAD: GESTION DE ENLACES Y PERSISTENCIA ACID
 *
 * En modo memoria (`:memory:` o `mode=memory`) se mantiene una conexion
 * ancla viva para que el esquema sea visible a todas las conexiones
 * subsecuentes del mismo proceso — SQLite purgaria la base de datos en
 * memoria en cuanto la ultima conexion se cerrara.
 * =================================================================
 */

use crate::errors::DbError;
use crate::schema::apply_full_schema;
use libsql::{Builder, Connection, Database};
use std::sync::Arc;
use tracing::{error, info, instrument};

#[derive(Clone)]
pub struct Store {
    driver: Arc<Database>,
    _memory_anchor: Option<Arc<Connection>>,
}

impl Store {
    #[instrument(skip(database_access_token))]
    pub async fn connect(database_connection_url: &str, database_access_token: Option<String>) -> Result<Self, DbError> {
        if database_connection_url.is_empty() {
            return Err(DbError::ConnectionError("DATABASE_URL undefined".into()));
        }

        info!("initiating database link to [{}]", database_connection_url);

        let is_remote = database_connection_url.starts_with("libsql://") || database_connection_url.starts_with("https://");
        let is_memory = database_connection_url.contains(":memory:") || database_connection_url.contains("mode=memory");

        let driver = if is_remote {
            let token = database_access_token
                .ok_or_else(|| DbError::ConnectionError("remote access denied: token missing".into()))?;
            Builder::new_remote(database_connection_url.to_string(), token).build().await
        } else {
            Builder::new_local(database_connection_url).build().await
        }
        .map_err(|e| DbError::ConnectionError(format!("driver ignition failure: {e}")))?;

        let driver = Arc::new(driver);
        let mut anchor = None;

        if is_memory {
            let anchor_conn = driver.connect().map_err(|e| DbError::ConnectionError(format!("anchor fault: {e}")))?;
            apply_full_schema(&anchor_conn).await?;
            anchor = Some(Arc::new(anchor_conn));
            info!("memory strata anchored");
        } else {
            let bootstrap_conn = driver.connect().map_err(|e| DbError::ConnectionError(format!("bootstrap link fault: {e}")))?;
            apply_full_schema(&bootstrap_conn).await?;
        }

        Ok(Self { driver, _memory_anchor: anchor })
    }

    pub fn connection(&self) -> Result<Connection, DbError> {
        self.driver.connect().map_err(|e| {
            error!("connection allocation failed: {e}");
            DbError::ConnectionError(e.to_string())
        })
    }
}
