// [apps/orchestrator/src/services/notifier.rs]
//! The issue-tracker notifier is an out-of-scope external collaborator
//! (spec §1): "a thin wrapper" we only need to call through a seam. Logged
//! via `tracing` by default, matching the teacher's stance that ambient
//! logging stands in for an unbuilt outer integration.

use tracing::info;

pub trait IssueTrackerNotifier: Send + Sync {
    fn notify(&self, summary: &str, detail: &serde_json::Value);
}

#[derive(Default)]
pub struct LoggingNotifier;

impl IssueTrackerNotifier for LoggingNotifier {
    fn notify(&self, summary: &str, detail: &serde_json::Value) {
        info!(target: "issue_tracker", detail = %detail, "{summary}");
    }
}
