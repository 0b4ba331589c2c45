// [apps/orchestrator/src/handlers/lifecycle.rs]
//! `POST /lifecycle/run` — operator-triggered state-machine pass (C6);
//! the scheduler loop never calls the lifecycle engine itself (spec has no
//! lifecycle schedule), so this is the only entry point.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

use crate::auth::{CallerPrincipal, Role};
use crate::error::ApiError;
use crate::middleware::require_role;
use crate::services::approval_gate;
use crate::services::lifecycle;
use crate::services::notifier::IssueTrackerNotifier;
use crate::state::AppState;

pub async fn run(State(state): State<AppState>, headers: HeaderMap, principal: Option<axum::extract::Extension<CallerPrincipal>>) -> Result<impl IntoResponse, ApiError> {
    let principal = principal.map(|p| p.0);
    require_role(principal.as_ref(), Role::Operator)?;

    let tx = approval_gate::begin(
        &state,
        &principal.map(|p| p.principal).unwrap_or_default(),
        "POST",
        "/lifecycle/run",
        &[],
        None,
        headers.get("x-cmdb-approval-id").and_then(|v| v.to_str().ok()),
    )
    .await?;

    let (summary, pending_notifications) = lifecycle::run_tx(&tx, &state).await?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;

    for (summary_text, detail) in pending_notifications {
        state.issue_notifier.notify(&summary_text, &detail);
    }

    Ok(Json(summary))
}
