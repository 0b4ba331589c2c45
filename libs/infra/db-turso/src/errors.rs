// [libs/infra/db-turso/src/errors.rs]
/*!
 * =================================================================
 * APARATO: DATABASE ERROR CATALOG (V1.0)
 * CLASIFICACION: INFRASTRUCTURE CORE (ESTRATO L3)
 * RESPONSABILIDAD: CATALOGACION SEMANTICA DE FALLOS DE PERSISTENCIA
 * =================================================================
 */

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Error de enlace fisico o de red con el cluster libSQL.
    #[error("[L3_DB_NET_FAULT]: database uplink severed -> {0}")]
    ConnectionError(String),

    /// Fallo en la configuracion del entorno (variables vacias o malformadas).
    #[error("[L3_DB_CONFIG_FAULT]: configuration void -> {0}")]
    ConfigurationError(String),

    /// Error de sintaxis o ejecucion devuelto por el motor libSQL.
    #[error("[L3_DB_QUERY_FAULT]: query rejected -> {0}")]
    QueryError(#[from] libsql::Error),

    /// Fallo en la transformacion de tipos entre SQLite y el dominio Rust.
    #[error("[L3_DB_MAPPING_FAULT]: mapping violation -> {0}")]
    MappingError(String),

    /// Error al comprometer cambios en una secuencia multi-tabla.
    #[error("[L3_DB_FAULT]: transaction collapse -> {0}")]
    TransactionError(String),

    /// La fila solicitada no existe.
    #[error("[L3_NOT_FOUND]: {0}")]
    NotFound(String),

    /// Violacion de una invariante de dominio (identidad duplicada, transicion
    /// de estado invalida, etc).
    #[error("[L3_CONFLICT]: {0}")]
    Conflict(String),
}
