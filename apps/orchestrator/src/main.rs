// [apps/orchestrator/src/main.rs]
//! Binary entry point: load env, init tracing, ignite the kernel, serve.

use cmdb_orchestrator::prelude::*;
use cmdb_shared_telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing("cmdb_orchestrator");

    let config = Config::load_from_env();
    info!(port = config.port, env = %config.app_env, "starting orchestrator");

    let kernel = OrchestratorKernel::ignite(config).await;
    kernel.launch().await;
}
