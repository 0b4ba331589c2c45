// [libs/infra/db-turso/src/lib.rs]
/*!
 * =================================================================
 * APARATO: INFRA-DB CRATE ROOT (V1.0)
 * CLASIFICACION: CRATE ROOT (ESTRATO L3)
 * RESPONSABILIDAD: ACCESO TIPADO Y PERSISTENTE AL ALMACEN CMDB
 * =================================================================
 */

pub mod client;
pub mod errors;
pub mod models;
pub mod repositories;
pub mod schema;

pub use client::Store;
pub use errors::DbError;

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> Store {
        Store::connect(":memory:", None).await.expect("in-memory store should connect")
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = memory_store().await;
        let connection = store.connection().unwrap();
        // re-applying the schema on the same connection must not error
        schema::apply_full_schema(&connection).await.unwrap();
    }
}
