// [apps/orchestrator/src/handlers/health.rs]
//! Public liveness probe; never gated by auth or rate limiting.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn check(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok", "env": state.config.app_env})))
}
