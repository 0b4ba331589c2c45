// [apps/orchestrator/src/handlers/mod.rs]
//! HTTP handlers: one module per route group, thin over `services::*`.
//! Every handler returns `Result<impl IntoResponse, ApiError>`; the
//! approval gate (C11) is invoked directly inside mutating handlers per
//! spec §5, never as a generic middleware layer.

pub mod approvals;
pub mod audit;
pub mod cis;
pub mod dashboard;
pub mod governance;
pub mod health;
pub mod ingest;
pub mod integrations;
pub mod lifecycle;
pub mod relationships;
