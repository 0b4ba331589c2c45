// [apps/orchestrator/src/services/telemetry.rs]
//! C13: sliding-window event counters with three built-in threshold rules,
//! feeding the `/dashboard/alerts` surface. Mirrors the rate limiter's
//! mutex-guarded-deque shape (`services/rate_limit.rs`) but keyed by event
//! type instead of by principal, and pruned to a 300s window on read.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const WINDOW_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRule {
    pub name: &'static str,
    pub event_type: &'static str,
    pub threshold: usize,
    pub severity: Severity,
}

const RULES: &[AlertRule] = &[
    AlertRule { name: "rate_limit_spike", event_type: "rate_limited", threshold: 20, severity: Severity::Warning },
    AlertRule { name: "server_error_spike", event_type: "server_error", threshold: 5, severity: Severity::Critical },
    AlertRule { name: "sync_job_failures", event_type: "sync.job_failed", threshold: 3, severity: Severity::Critical },
];

#[derive(Debug, Clone, Serialize)]
pub struct AlertEvaluation {
    pub rule: &'static str,
    pub severity: Severity,
    pub count: usize,
    pub threshold: usize,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub counts: HashMap<String, usize>,
    pub alerts: Vec<AlertEvaluation>,
    pub active_alerts: Vec<AlertEvaluation>,
}

#[derive(Default)]
pub struct Telemetry {
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self { windows: Mutex::new(HashMap::new()) }
    }

    pub fn tick(&self, event_type: &str, now: DateTime<Utc>) {
        let mut windows = self.windows.lock().expect("telemetry mutex poisoned");
        windows.entry(event_type.to_string()).or_default().push_back(now);
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> TelemetrySnapshot {
        let cutoff = now - ChronoDuration::seconds(WINDOW_SECONDS);
        let mut windows = self.windows.lock().expect("telemetry mutex poisoned");
        let mut counts = HashMap::new();
        for (event_type, deque) in windows.iter_mut() {
            while let Some(front) = deque.front() {
                if *front <= cutoff {
                    deque.pop_front();
                } else {
                    break;
                }
            }
            counts.insert(event_type.clone(), deque.len());
        }

        let alerts: Vec<AlertEvaluation> = RULES
            .iter()
            .map(|rule| {
                let count = counts.get(rule.event_type).copied().unwrap_or(0);
                AlertEvaluation { rule: rule.name, severity: rule.severity, count, threshold: rule.threshold, active: count >= rule.threshold }
            })
            .collect();
        let active_alerts = alerts.iter().filter(|a| a.active).cloned().collect();

        TelemetrySnapshot { counts, alerts, active_alerts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_activates_at_threshold() {
        let telemetry = Telemetry::new();
        let now = Utc::now();
        for _ in 0..3 {
            telemetry.tick("sync.job_failed", now);
        }
        let snap = telemetry.snapshot(now);
        let rule = snap.alerts.iter().find(|a| a.rule == "sync_job_failures").unwrap();
        assert!(rule.active);
    }

    #[test]
    fn window_prunes_old_ticks() {
        let telemetry = Telemetry::new();
        let t0 = Utc::now();
        telemetry.tick("server_error", t0);
        let later = t0 + ChronoDuration::seconds(301);
        let snap = telemetry.snapshot(later);
        assert_eq!(snap.counts.get("server_error").copied().unwrap_or(0), 0);
    }
}
