// [apps/orchestrator/src/kernel.rs]
//! Composition root: owns the database connection, builds `AppState`,
//! spawns the background loops (sync worker, scheduler), and serves the
//! axum router with graceful shutdown on SIGINT/SIGTERM.

use crate::config::Config;
use crate::routes::build_router;
use crate::services::queue;
use crate::services::scheduler;
use crate::state::AppState;
use cmdb_infra_db::Store;
use std::net::{IpAddr, SocketAddr};
use tracing::{error, info, instrument};

pub struct OrchestratorKernel {
    port: u16,
    state: AppState,
}

impl OrchestratorKernel {
    #[instrument(skip(config))]
    pub async fn ignite(config: Config) -> Self {
        let store = Store::connect(&config.database_url, config.turso_auth_token.clone())
            .await
            .expect("database connection must succeed at startup");

        let port = config.port;
        Self { port, state: AppState::new(store, config) }
    }

    pub async fn launch(self) {
        let worker_state = self.state.clone();
        tokio::spawn(async move { queue::spawn_worker_loop(worker_state).await });

        let scheduler_state = self.state.clone();
        tokio::spawn(async move { scheduler::spawn_scheduler_loop(scheduler_state).await });

        let shutdown_state = self.state.clone();
        tokio::spawn(async move { wait_for_shutdown_signal(shutdown_state).await });

        let router = build_router(self.state.clone());
        let bind_address = SocketAddr::new("0.0.0.0".parse::<IpAddr>().unwrap(), self.port);

        let listener = tokio::net::TcpListener::bind(bind_address).await.expect("failed to bind network port");
        info!(%bind_address, "orchestrator listening");

        let state_for_shutdown = self.state.clone();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            state_for_shutdown.wait_for_shutdown().await;
        });

        if let Err(err) = server.await {
            error!(error = %err, "server loop exited with an error");
            std::process::exit(1);
        }
    }
}

async fn wait_for_shutdown_signal(state: AppState) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    state.request_shutdown();
}
