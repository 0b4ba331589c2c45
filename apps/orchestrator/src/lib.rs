// [apps/orchestrator/src/lib.rs]
//! Crate root: module tree for the reconciliation/governance/integration
//! core of the CMDB orchestrator.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod kernel;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

/// Re-exports for `main.rs` and `bin/migrator.rs`.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::kernel::OrchestratorKernel;
    pub use crate::state::AppState;
}
