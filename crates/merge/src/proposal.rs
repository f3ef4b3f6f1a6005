use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use coalesce_types::{AiSignal, EntityType, Record};

/// Named, potentially blocking condition detected during proposal
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyFlag {
    ConflictingIdentifiers,
    TemporalConflicts,
    RelationshipConflicts,
    DataDisparity,
    SuspiciousPatterns,
}

impl SafetyFlag {
    pub fn slug(&self) -> &'static str {
        match self {
            SafetyFlag::ConflictingIdentifiers => "conflicting_identifiers",
            SafetyFlag::TemporalConflicts => "temporal_conflicts",
            SafetyFlag::RelationshipConflicts => "relationship_conflicts",
            SafetyFlag::DataDisparity => "data_disparity",
            SafetyFlag::SuspiciousPatterns => "suspicious_patterns",
        }
    }
}

/// Merge strategies differ only in how field disagreements are handled:
/// conservative records them, aggressive silently keeps the primary value,
/// manual-only requires explicit approval before anything runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Conservative,
    Aggressive,
    ManualOnly,
}

impl MergeStrategy {
    pub fn slug(&self) -> &'static str {
        match self {
            MergeStrategy::Conservative => "conservative",
            MergeStrategy::Aggressive => "aggressive",
            MergeStrategy::ManualOnly => "manual_only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Failed,
}

/// A proposal to merge two records, carrying the safety assessment made at
/// construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeProposal {
    pub proposal_id: Uuid,
    pub primary: Record,
    pub secondary: Record,
    pub entity_type: EntityType,
    pub confidence: f64,
    pub evidence: Value,
    pub ai_signal: Option<AiSignal>,
    pub created_at: DateTime<Utc>,
    pub status: ProposalStatus,
    pub merged: Option<Record>,
    pub strategy: MergeStrategy,
    pub safety_flags: Vec<SafetyFlag>,
    pub risk_factors: Vec<String>,
}

/// Outcome of one merge execution attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeResult {
    pub success: bool,
    pub merged: Option<Record>,
    pub audit_id: Option<Uuid>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub rollback_info: Value,
}

impl MergeResult {
    pub fn blocked() -> Self {
        Self {
            success: false,
            errors: vec!["blocked by safety".to_string()],
            ..Self::default()
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            ..Self::default()
        }
    }
}
