// [apps/orchestrator/src/config.rs]
//! Runtime configuration, read once at startup. Mirrors the teacher's
//! flat `std::env::var` reading style in `main.rs`, generalized into a
//! single struct so services borrow fields instead of re-reading env.

use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Per-path-prefix rate/payload limit, applied to mutating endpoints.
#[derive(Debug, Clone, Copy)]
pub struct PathLimit {
    pub requests_per_minute: u32,
    pub max_payload_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub turso_auth_token: Option<String>,
    pub port: u16,
    pub app_env: String,

    pub maker_checker_enabled: bool,
    pub maker_checker_bind_requester: bool,
    pub maker_checker_default_ttl_minutes: i64,
    pub sync_scheduler_enabled: bool,
    pub netbox_sync_enabled: bool,
    pub backstage_sync_enabled: bool,

    pub max_bulk_items: usize,
    pub global_rate_limit_per_minute: u32,
    pub approver_rate_limit_per_minute: u32,
    pub default_payload_limit_bytes: u64,

    pub sync_worker_poll_seconds: u64,
    pub sync_job_retry_base_seconds: u64,
    pub approval_cleanup_interval_seconds: u64,

    pub netbox_url: Option<String>,
    pub netbox_token: Option<String>,
    pub backstage_url: Option<String>,
    pub backstage_token: Option<String>,
    pub backstage_jwt_secret: Option<String>,

    pub lifecycle_staging_days: i64,
    pub lifecycle_review_days: i64,
    pub lifecycle_retired_days: i64,

    pub source_precedence: Vec<String>,

    pub request_timeout_seconds: u64,
    pub outbound_http_timeout_seconds: u64,

    pub service_auth_mode: String,
    pub static_tokens: Vec<(String, String, String)>,
}

impl Config {
    /// Reads every variable the orchestrator needs from the process
    /// environment; `dotenvy::dotenv()` should already have been called by
    /// the binary entry point before this runs.
    pub fn load_from_env() -> Self {
        let source_precedence = env::var("SOURCE_PRECEDENCE")
            .unwrap_or_else(|_| "manual,azure,vcenter,zabbix,k8s".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let static_tokens = env::var("STATIC_AUTH_TOKENS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|entry| {
                let mut parts = entry.splitn(3, ':');
                let token = parts.next()?.trim();
                let principal = parts.next()?.trim();
                let role = parts.next().unwrap_or("viewer").trim();
                if token.is_empty() {
                    return None;
                }
                Some((token.to_string(), principal.to_string(), role.to_string()))
            })
            .collect();

        Config {
            database_url: env_string("DATABASE_URL", ""),
            turso_auth_token: env::var("TURSO_AUTH_TOKEN").ok(),
            port: env_u64("PORT", 3000) as u16,
            app_env: env_string("APP_ENV", "development"),

            maker_checker_enabled: env_bool("MAKER_CHECKER_ENABLED", false),
            maker_checker_bind_requester: env_bool("MAKER_CHECKER_BIND_REQUESTER", true),
            maker_checker_default_ttl_minutes: env_i64("MAKER_CHECKER_DEFAULT_TTL_MINUTES", 30),
            sync_scheduler_enabled: env_bool("SYNC_SCHEDULER_ENABLED", false),
            netbox_sync_enabled: env_bool("NETBOX_SYNC_ENABLED", false),
            backstage_sync_enabled: env_bool("BACKSTAGE_SYNC_ENABLED", false),

            max_bulk_items: env_u64("MAX_BULK_ITEMS", 500) as usize,
            global_rate_limit_per_minute: env_u64("GLOBAL_RATE_LIMIT_PER_MINUTE", 600) as u32,
            approver_rate_limit_per_minute: env_u64("APPROVER_RATE_LIMIT_PER_MINUTE", 60) as u32,
            default_payload_limit_bytes: env_u64("DEFAULT_PAYLOAD_LIMIT_BYTES", 1_048_576),

            sync_worker_poll_seconds: env_u64("SYNC_WORKER_POLL_SECONDS", 5),
            sync_job_retry_base_seconds: env_u64("SYNC_JOB_RETRY_BASE_SECONDS", 1),
            approval_cleanup_interval_seconds: env_u64("APPROVAL_CLEANUP_INTERVAL_SECONDS", 60),

            netbox_url: env::var("NETBOX_URL").ok(),
            netbox_token: env::var("NETBOX_TOKEN").ok(),
            backstage_url: env::var("BACKSTAGE_URL").ok(),
            backstage_token: env::var("BACKSTAGE_TOKEN").ok(),
            backstage_jwt_secret: env::var("BACKSTAGE_JWT_SECRET").ok(),

            lifecycle_staging_days: env_i64("LIFECYCLE_STAGING_DAYS", 30),
            lifecycle_review_days: env_i64("LIFECYCLE_REVIEW_DAYS", 90),
            lifecycle_retired_days: env_i64("LIFECYCLE_RETIRED_DAYS", 120),

            source_precedence,

            request_timeout_seconds: env_u64("REQUEST_TIMEOUT_SECONDS", 30),
            outbound_http_timeout_seconds: env_u64("OUTBOUND_HTTP_TIMEOUT_SECONDS", 20),

            service_auth_mode: env_string("SERVICE_AUTH_MODE", "static"),
            static_tokens,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn outbound_http_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_http_timeout_seconds)
    }

    /// `rank(source)`: index into `source_precedence`, unknown sources rank
    /// last (below every configured entry).
    pub fn source_rank(&self, source: &str) -> usize {
        self.source_precedence
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.source_precedence.len())
    }

    pub fn is_dev_like(&self) -> bool {
        matches!(self.app_env.to_ascii_lowercase().as_str(), "dev" | "development" | "local" | "test")
    }

    /// Per-prefix mutating rate/payload limit; falls back to a default
    /// bucket when the path doesn't match a known prefix.
    pub fn limit_for_path(&self, path: &str) -> PathLimit {
        let (requests_per_minute, max_payload_bytes) = match () {
            _ if path.starts_with("/ingest") => (30, 4 * 1024 * 1024),
            _ if path.starts_with("/integrations") => (60, self.default_payload_limit_bytes),
            _ if path.starts_with("/relationships") => (120, self.default_payload_limit_bytes),
            _ if path.starts_with("/cis") => (120, self.default_payload_limit_bytes),
            _ if path.starts_with("/governance") => (60, self.default_payload_limit_bytes),
            _ if path.starts_with("/lifecycle") => (10, self.default_payload_limit_bytes),
            _ if path.starts_with("/approvals") => (self.approver_rate_limit_per_minute, self.default_payload_limit_bytes),
            _ => (60, self.default_payload_limit_bytes),
        };
        PathLimit { requests_per_minute, max_payload_bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_source_ranks_last() {
        let mut cfg = Config::load_from_env();
        cfg.source_precedence = vec!["manual".into(), "azure".into()];
        assert_eq!(cfg.source_rank("manual"), 0);
        assert_eq!(cfg.source_rank("azure"), 1);
        assert_eq!(cfg.source_rank("nonexistent"), 2);
    }
}
