// [apps/orchestrator/src/bin/migrator.rs]
//! Standalone schema-apply CLI. `Store::connect` bootstraps the full
//! schema idempotently, so this binary exists only to run that step
//! outside the server process (CI migration step, cold-start probes).

use cmdb_infra_db::Store;
use cmdb_shared_telemetry::init_tracing;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("cmdb_migrator");

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let database_token = std::env::var("TURSO_AUTH_TOKEN").ok();

    match Store::connect(&database_url, database_token).await {
        Ok(_) => {
            info!("schema applied successfully");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "schema migration failed");
            std::process::exit(1);
        }
    }
}
