use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use coalesce_types::AiSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn slug(&self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "high" => Some(TaskPriority::High),
            "medium" | "med" => Some(TaskPriority::Medium),
            "low" => Some(TaskPriority::Low),
            _ => None,
        }
    }
}

/// Review-task lifecycle. The only legal sequences are
/// `Pending → InProgress → Completed` and `Pending → Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn slug(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Merge,
    Separate,
    Defer,
    MoreInfo,
}

impl ReviewDecision {
    pub fn slug(&self) -> &'static str {
        match self {
            ReviewDecision::Merge => "merge",
            ReviewDecision::Separate => "separate",
            ReviewDecision::Defer => "defer",
            ReviewDecision::MoreInfo => "more_info",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "merge" => Some(ReviewDecision::Merge),
            "separate" => Some(ReviewDecision::Separate),
            "defer" => Some(ReviewDecision::Defer),
            "more_info" | "moreinfo" => Some(ReviewDecision::MoreInfo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOp {
    Merge,
    Separate,
    ReviewCompleted,
    Rollback,
}

impl AuditOp {
    pub fn slug(&self) -> &'static str {
        match self {
            AuditOp::Merge => "merge",
            AuditOp::Separate => "separate",
            AuditOp::ReviewCompleted => "review_completed",
            AuditOp::Rollback => "rollback",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "merge" => Some(AuditOp::Merge),
            "separate" => Some(AuditOp::Separate),
            "review_completed" => Some(AuditOp::ReviewCompleted),
            "rollback" => Some(AuditOp::Rollback),
            _ => None,
        }
    }
}

/// A persisted unit of reviewer work covering one candidate pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTask {
    pub task_id: Uuid,
    pub collection: String,
    /// Serialized pair context (records, scores, classification); the store
    /// never inspects it.
    pub pair_payload: Value,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_to: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub decision: Option<ReviewDecision>,
    pub reviewer_notes: Option<String>,
    pub reviewer_confidence: Option<f64>,
    pub ai_signal: Option<AiSignal>,
}

/// Append-only description of one operation with its before/after states.
///
/// Never modified once written; a rollback appends a new record with the
/// states inverted and a pointer back to the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub op: AuditOp,
    pub collection: String,
    pub entity_ids: Vec<String>,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub evidence: Value,
    pub before_state: Value,
    pub after_state: Value,
    pub rollback_info: Value,
    pub ai_signal: Option<AiSignal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetric {
    pub date: DateTime<Utc>,
    pub metric_type: String,
    pub metric_value: f64,
    pub details: Option<Value>,
}

/// Aggregated review and operation activity over a lookback window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualitySummary {
    pub period_days: i64,
    pub review_decisions: std::collections::BTreeMap<String, ActivityStats>,
    pub operations: std::collections::BTreeMap<String, ActivityStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityStats {
    pub count: usize,
    pub mean_confidence: f64,
}
