// [apps/orchestrator/src/services/mod.rs]
//! Service registry: reconciliation, governance, lifecycle, integration
//! jobs, and the ambient concerns (rate limiting, telemetry, auditing)
//! that wrap them.

pub mod approval_gate;
pub mod audit_log;
pub mod backstage;
pub mod drift;
pub mod governance;
pub mod integration_publisher;
pub mod lifecycle;
pub mod netbox;
pub mod notifier;
pub mod queue;
pub mod rate_limit;
pub mod reconciler;
pub mod relationships;
pub mod scheduler;
pub mod telemetry;
