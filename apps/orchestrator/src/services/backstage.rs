// [apps/orchestrator/src/services/backstage.rs]
//! Backstage-specific auth and entity translation for the integration
//! publisher (C7) and drift detector (C12). Self-signed HS256 is a
//! fallback for when no static bearer token is configured — grounded on
//! `hmac`/`sha2` usage seen across the retrieval pack's other example
//! manifests (no JWT library dependency is added; the claim set here is
//! fixed and small enough to hand-encode).

use crate::state::AppState;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine};
use cmdb_infra_db::models::Ci;
use hmac::{Hmac, Mac};
use serde_json::{json, Value as Json};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const JWT_TTL_SECONDS: i64 = 3600;

/// Prefers a configured bearer token; falls back to a self-signed HS256
/// JWT from `BACKSTAGE_JWT_SECRET` (1-hour expiry) when no bearer is set.
pub fn resolve_bearer(state: &AppState) -> Option<String> {
    if let Some(token) = &state.config.backstage_token {
        return Some(token.clone());
    }
    let secret = state.config.backstage_jwt_secret.as_ref()?;
    sign_hs256(secret, state.now().timestamp()).ok()
}

fn sign_hs256(base64url_secret: &str, now_unix: i64) -> Result<String, String> {
    let secret_bytes = BASE64_URL.decode(base64url_secret).map_err(|e| e.to_string())?;

    let header = json!({"alg": "HS256", "typ": "JWT"});
    let claims = json!({"iss": "cmdb-orchestrator", "iat": now_unix, "exp": now_unix + JWT_TTL_SECONDS});

    let header_b64 = BASE64_URL.encode(header.to_string());
    let claims_b64 = BASE64_URL.encode(claims.to_string());
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = HmacSha256::new_from_slice(&secret_bytes).map_err(|e| e.to_string())?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = BASE64_URL.encode(signature);

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Translates a reconciler event into a Backstage ingest message.
pub fn translate_ci_event(event_type: &str, ci: &Ci) -> Json {
    json!({
        "entity": {
            "apiVersion": "backstage.io/v1alpha1",
            "kind": "Resource",
            "metadata": {
                "name": ci.name,
                "annotations": {"unifiedcmdb.io/ci-id": ci.id},
            },
            "spec": {"type": ci.ci_type, "owner": ci.owner},
        },
        "event_type": event_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hs256_signature_is_deterministic_for_fixed_time() {
        let secret = BASE64_URL.encode("super-secret-key");
        let a = sign_hs256(&secret, 1_700_000_000).unwrap();
        let b = sign_hs256(&secret, 1_700_000_000).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.split('.').count(), 3);
    }

    #[test]
    fn invalid_secret_errors() {
        assert!(sign_hs256("not-valid-base64url!!!", 0).is_err());
    }
}
