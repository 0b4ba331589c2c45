// [apps/orchestrator/src/state/mod.rs]
//! Shared application state, injected into every handler and background
//! service. A single `Service struct initialized at startup and passed by
//! reference` (spec §9 design note) — no package-level mutable statics.

use crate::auth::{AuthResolver, StaticAuthResolver};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::services::notifier::{IssueTrackerNotifier, LoggingNotifier};
use crate::services::rate_limit::RateLimiter;
use crate::services::telemetry::Telemetry;
use cmdb_infra_db::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub rate_limiter: Arc<RateLimiter>,
    pub telemetry: Arc<Telemetry>,
    pub auth_resolver: Arc<dyn AuthResolver>,
    pub issue_notifier: Arc<dyn IssueTrackerNotifier>,
    pub http_client: reqwest::Client,
    shutdown_signal: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(store: Store, config: Config) -> Self {
        let config = Arc::new(config);
        let auth_resolver: Arc<dyn AuthResolver> = Arc::new(StaticAuthResolver::new(&config.static_tokens));
        let http_client = reqwest::Client::builder()
            .timeout(config.outbound_http_timeout())
            .build()
            .expect("http client configuration must be valid");

        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            rate_limiter: Arc::new(RateLimiter::new()),
            telemetry: Arc::new(Telemetry::new()),
            auth_resolver,
            issue_notifier: Arc::new(LoggingNotifier),
            http_client,
            shutdown_signal: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Signals every background task listening on `wait_for_shutdown` to
    /// stop; idempotent.
    pub fn request_shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown_signal.notify_waiters();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub async fn wait_for_shutdown(&self) {
        if self.is_stopping() {
            return;
        }
        self.shutdown_signal.notified().await;
    }
}
