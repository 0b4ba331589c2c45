// [libs/infra/db-turso/src/models.rs]
/*!
 * Tipos de dominio persistidos por el Store. `attributes`/`payload`/`result`
 * son modelados como `serde_json::Value` (la suma string|number|bool|null|
 * array|object que pide la especificacion de "dynamic dict payloads").
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CiStatus {
    Active,
    Staging,
    RetirementReview,
    Retired,
}

impl CiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiStatus::Active => "ACTIVE",
            CiStatus::Staging => "STAGING",
            CiStatus::RetirementReview => "RETIREMENT_REVIEW",
            CiStatus::Retired => "RETIRED",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "STAGING" => CiStatus::Staging,
            "RETIREMENT_REVIEW" => CiStatus::RetirementReview,
            "RETIRED" => CiStatus::Retired,
            _ => CiStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ci {
    pub id: String,
    pub name: String,
    pub ci_type: String,
    pub source: String,
    pub owner: Option<String>,
    pub status: CiStatus,
    pub attributes: Json,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub ci_id: String,
    pub scheme: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_ci_id: String,
    pub target_ci_id: String,
    pub relation_type: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub ci_id: Option<String>,
    pub event_type: String,
    pub payload: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CollisionStatus {
    Open,
    Resolved,
}

impl CollisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollisionStatus::Open => "OPEN",
            CollisionStatus::Resolved => "RESOLVED",
        }
    }
    pub fn parse(raw: &str) -> Self {
        match raw {
            "RESOLVED" => CollisionStatus::Resolved,
            _ => CollisionStatus::Open,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceCollision {
    pub id: String,
    pub scheme: String,
    pub value: String,
    pub existing_ci_id: String,
    pub incoming_ci_id: String,
    pub status: CollisionStatus,
    pub resolution_note: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }
    pub fn parse(raw: &str) -> Self {
        match raw {
            "RUNNING" => JobStatus::Running,
            "SUCCEEDED" => JobStatus::Succeeded,
            "FAILED" => JobStatus::Failed,
            _ => JobStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub requested_by: String,
    pub payload: Json,
    pub result: Option<Json>,
    pub last_error: Option<String>,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub next_run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Consumed,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Consumed => "CONSUMED",
        }
    }
    pub fn parse(raw: &str) -> Self {
        match raw {
            "APPROVED" => ApprovalStatus::Approved,
            "REJECTED" => ApprovalStatus::Rejected,
            "CONSUMED" => ApprovalStatus::Consumed,
            _ => ApprovalStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeApproval {
    pub id: String,
    pub method: String,
    pub request_path: String,
    pub payload_hash: String,
    pub payload_preview: Json,
    pub reason: Option<String>,
    pub requested_by: String,
    pub status: ApprovalStatus,
    pub decided_by: Option<String>,
    pub decision_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
}
