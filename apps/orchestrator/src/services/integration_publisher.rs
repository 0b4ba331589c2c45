// [apps/orchestrator/src/services/integration_publisher.rs]
//! C7: best-effort outbound event publishing to NetBox/Backstage. Grounded
//! on the teacher's `outbox_relay.rs` HTTP-posting style (reqwest client
//! already in `AppState`, status-code-driven outcome classification) but
//! failures are swallowed and returned in the result map instead of
//! retried in a loop — delivery here is fire-and-forget per spec §4.4; the
//! retry/backoff discipline lives in the sync-job queue (C8) instead.

use crate::services::backstage;
use crate::state::AppState;
use cmdb_infra_db::models::{Ci, Relationship};
use reqwest::Url;
use serde::Serialize;
use serde_json::json;
use tracing::{instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryError {
    InvalidTargetUrl,
    UpstreamRejected { status: u16 },
    DeliveryFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub target: &'static str,
    pub delivered: bool,
    pub error: Option<DeliveryError>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishResult {
    pub outcomes: Vec<TargetOutcome>,
}

/// Parses and validates an outbound target URL: must be http(s); in any
/// environment other than dev/development/local/test, plain `http` is
/// rejected.
fn validate_target_url(raw: &str, is_dev_like: bool) -> Result<Url, DeliveryError> {
    let url = Url::parse(raw).map_err(|_| DeliveryError::InvalidTargetUrl)?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if is_dev_like => Ok(url),
        _ => Err(DeliveryError::InvalidTargetUrl),
    }
}

async fn post_envelope(state: &AppState, target: &'static str, url: &str, bearer: Option<&str>, body: serde_json::Value) -> TargetOutcome {
    let parsed = match validate_target_url(url, state.config.is_dev_like()) {
        Ok(u) => u,
        Err(error) => return TargetOutcome { target, delivered: false, error: Some(error) },
    };

    let mut request = state.http_client.post(parsed).json(&body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    match request.send().await {
        Ok(response) if response.status().is_success() => TargetOutcome { target, delivered: true, error: None },
        Ok(response) => {
            warn!(target = target, status = %response.status(), "integration publish rejected by upstream");
            TargetOutcome { target, delivered: false, error: Some(DeliveryError::UpstreamRejected { status: response.status().as_u16() }) }
        }
        Err(err) => {
            warn!(target = target, error = %err, "integration publish delivery failed");
            TargetOutcome { target, delivered: false, error: Some(DeliveryError::DeliveryFailed) }
        }
    }
}

#[instrument(skip(state, ci))]
pub async fn publish_ci_event(state: &AppState, event_type: &str, ci: &Ci) -> PublishResult {
    let mut outcomes = Vec::new();
    let envelope = json!({"event_type": event_type, "ci": ci});

    if state.config.netbox_sync_enabled {
        if let Some(url) = &state.config.netbox_url {
            outcomes.push(post_envelope(state, "netbox", url, state.config.netbox_token.as_deref(), envelope.clone()).await);
        }
    }

    if state.config.backstage_sync_enabled {
        if let Some(url) = &state.config.backstage_url {
            let token = backstage::resolve_bearer(state);
            let backstage_envelope = backstage::translate_ci_event(event_type, ci);
            outcomes.push(post_envelope(state, "backstage", url, token.as_deref(), backstage_envelope).await);
        }
    }

    PublishResult { outcomes }
}

#[instrument(skip(state, relationship))]
pub async fn publish_relationship_event(state: &AppState, relationship: &Relationship) -> PublishResult {
    let mut outcomes = Vec::new();
    let envelope = json!({"event_type": "relationship.created", "relationship": relationship});

    if state.config.netbox_sync_enabled {
        if let Some(url) = &state.config.netbox_url {
            outcomes.push(post_envelope(state, "netbox", url, state.config.netbox_token.as_deref(), envelope.clone()).await);
        }
    }

    PublishResult { outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_plain_http_outside_dev() {
        let err = validate_target_url("http://netbox.internal/api", false).unwrap_err();
        assert_eq!(err, DeliveryError::InvalidTargetUrl);
    }

    #[test]
    fn allows_plain_http_in_dev() {
        assert!(validate_target_url("http://localhost:8000/api", true).is_ok());
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = validate_target_url("ftp://netbox.internal/api", true).unwrap_err();
        assert_eq!(err, DeliveryError::InvalidTargetUrl);
    }

    #[test]
    fn accepts_https_anywhere() {
        assert!(validate_target_url("https://netbox.internal/api", false).is_ok());
    }
}
