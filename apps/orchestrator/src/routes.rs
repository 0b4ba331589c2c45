// [apps/orchestrator/src/routes.rs]
//! Route table, wired per spec §6. Layer order follows §5 Concurrency:
//! global rate limit runs first (bounds unauthenticated floods), then
//! auth, then the per-principal mutating rate limit, then the payload
//! limit, then the per-request timeout closest to the handler. Axum
//! applies layers innermost-to-outermost in the order they're added, so
//! they're attached here in reverse of that execution order.

use crate::handlers::{approvals, audit, cis, dashboard, governance, health, ingest, integrations, lifecycle, relationships};
use crate::middleware::{auth_guard, correlation_id, global_rate_limit_guard, mutating_rate_limit_guard, payload_limit_guard, request_timeout_guard};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let ingest_routes = Router::new()
        .route("/cis:bulk", post(ingest::bulk_cis))
        .route("/relationships:bulk", post(ingest::bulk_relationships));

    let ci_routes = Router::new()
        .route("/", get(cis::list))
        .route("/:id", get(cis::get))
        .route("/:id/graph", get(cis::graph))
        .route("/:id/audit", get(cis::audit))
        .route("/:id/identities", get(cis::identities))
        .route("/:id/detail", get(cis::detail))
        .route("/:id/drift", get(cis::drift_report))
        .route("/:id/drift/resolve", post(cis::drift_resolve));

    let relationship_routes = Router::new()
        .route("/", get(relationships::list).post(relationships::create))
        .route("/:id", axum::routing::patch(relationships::update).delete(relationships::delete));

    let governance_routes = Router::new()
        .route("/collisions", get(governance::list))
        .route("/collisions/:id/resolve", post(governance::resolve))
        .route("/collisions/:id/reopen", post(governance::reopen));

    let integrations_routes = Router::new()
        .route("/status", get(integrations::status))
        .route("/jobs", get(integrations::list_jobs).post(integrations::enqueue_job))
        .route("/jobs/:id", get(integrations::get_job))
        .route("/netbox/export", get(integrations::netbox_export))
        .route("/netbox/import", post(integrations::netbox_import))
        .route("/netbox/watermarks", get(integrations::netbox_watermarks))
        .route("/backstage/entities", get(integrations::backstage_entities))
        .route("/backstage/sync", post(integrations::backstage_sync));

    let approval_routes = Router::new()
        .route("/", get(approvals::list).post(approvals::create))
        .route("/:id/approve", post(approvals::approve))
        .route("/:id/reject", post(approvals::reject));

    let dashboard_routes = Router::new()
        .route("/me", get(dashboard::me))
        .route("/summary", get(dashboard::summary))
        .route("/activity", get(dashboard::activity))
        .route("/alerts", get(dashboard::alerts));

    let protected = Router::new()
        .nest("/ingest", ingest_routes)
        .nest("/cis", ci_routes)
        .route("/pickers/cis", get(cis::pickers))
        .nest("/relationships", relationship_routes)
        .nest("/governance", governance_routes)
        .route("/lifecycle/run", post(lifecycle::run))
        .route("/audit/export", get(audit::export))
        .nest("/integrations", integrations_routes)
        .nest("/approvals", approval_routes)
        .nest("/dashboard", dashboard_routes)
        .layer(middleware::from_fn_with_state(state.clone(), request_timeout_guard))
        .layer(middleware::from_fn_with_state(state.clone(), payload_limit_guard))
        .layer(middleware::from_fn_with_state(state.clone(), mutating_rate_limit_guard))
        .layer(middleware::from_fn_with_state(state.clone(), auth_guard))
        .layer(middleware::from_fn_with_state(state.clone(), global_rate_limit_guard));

    Router::new()
        .route("/health", get(health::check))
        .merge(protected)
        .layer(middleware::from_fn(correlation_id))
        .layer(cors)
        .with_state(state)
}
