//! Merge proposal construction, safety gating, and strategy execution.

pub mod proposal;
pub mod safety;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use coalesce_audit::AuditStore;
use coalesce_types::{AiSignal, EntityType, Record};

pub use proposal::{MergeProposal, MergeResult, MergeStrategy, ProposalStatus, SafetyFlag};

/// Upper bound on the serialized size of a merged record.
const MAX_MERGED_BYTES: usize = 1_048_576;

#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Confidence at or above which an unapproved merge may proceed.
    pub auto_approve_threshold: f64,
    /// When set, any safety flag blocks execution.
    pub enable_safety_checks: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 95.0,
            enable_safety_checks: true,
        }
    }
}

/// Counters reported through the driver's `stats` surface.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MergeEngineStats {
    pub proposals: u64,
    pub executed: u64,
    pub failed: u64,
    pub safety_blocks: u64,
}

/// Executes entity merges against the audit store with safety protocols.
///
/// The store handle is owned at construction; there is no module-level
/// mutable state.
pub struct MergeEngine {
    options: MergeOptions,
    store: Arc<AuditStore>,
    proposals: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    safety_blocks: AtomicU64,
}

impl MergeEngine {
    pub fn new(store: Arc<AuditStore>, options: MergeOptions) -> Self {
        Self {
            options,
            store,
            proposals: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            safety_blocks: AtomicU64::new(0),
        }
    }

    /// Build a proposal: run the safety suite, derive risk factors, and
    /// select the execution strategy.
    pub fn create_proposal(
        &self,
        primary: Record,
        secondary: Record,
        confidence: f64,
        evidence: Value,
        entity_type: EntityType,
        ai_signal: Option<AiSignal>,
    ) -> MergeProposal {
        let safety_flags = safety::run_safety_checks(&primary, &secondary, entity_type);
        let risk_factors = safety::identify_risk_factors(confidence, ai_signal.as_ref(), &safety_flags);
        let strategy = select_strategy(confidence, &risk_factors, &safety_flags);

        self.proposals.fetch_add(1, Ordering::Relaxed);
        let proposal = MergeProposal {
            proposal_id: Uuid::new_v4(),
            primary,
            secondary,
            entity_type,
            confidence,
            evidence,
            ai_signal,
            created_at: Utc::now(),
            status: ProposalStatus::Pending,
            merged: None,
            strategy,
            safety_flags,
            risk_factors,
        };
        tracing::debug!(
            proposal_id = %proposal.proposal_id,
            confidence,
            strategy = proposal.strategy.slug(),
            flags = proposal.safety_flags.len(),
            "merge proposal created"
        );
        proposal
    }

    /// Execute a proposal if the safety gate admits it.
    ///
    /// On success the merged record and a `Merge` audit row (with full
    /// before/after states) are produced; on gate denial the result carries
    /// `success: false` and nothing is written.
    pub fn execute(
        &self,
        proposal: &mut MergeProposal,
        collection: &str,
        actor: &str,
        auto_approved: bool,
    ) -> MergeResult {
        if !self.admits(proposal, auto_approved) {
            self.safety_blocks.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                proposal_id = %proposal.proposal_id,
                flags = ?proposal.safety_flags,
                "merge blocked by safety gate"
            );
            return MergeResult::blocked();
        }

        let record_conflicts = proposal.strategy != MergeStrategy::Aggressive;
        let (merged, conflicts) = merge_records(
            &proposal.primary,
            &proposal.secondary,
            proposal.confidence,
            proposal.strategy,
            record_conflicts,
        );

        if let Err(problems) = validate_merged(&merged) {
            proposal.status = ProposalStatus::Failed;
            self.failed.fetch_add(1, Ordering::Relaxed);
            return MergeResult::failed(problems);
        }

        let rollback_info = json!({
            "original_entities": [proposal.primary.to_value(), proposal.secondary.to_value()],
            "merge_timestamp": Utc::now().to_rfc3339(),
        });

        let audit_id = match self.store.record_merge(
            collection,
            &proposal.primary.to_value(),
            &proposal.secondary.to_value(),
            &merged.to_value(),
            actor,
            proposal.confidence,
            proposal.evidence.clone(),
            proposal.ai_signal.clone(),
        ) {
            Ok(audit_id) => audit_id,
            Err(err) => {
                proposal.status = ProposalStatus::Failed;
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %err, "audit write failed during merge");
                return MergeResult::failed(vec![format!("audit write failed: {err}")]);
            }
        };

        proposal.status = ProposalStatus::Executed;
        proposal.merged = Some(merged.clone());
        self.executed.fetch_add(1, Ordering::Relaxed);

        let mut result = MergeResult {
            success: true,
            merged: Some(merged),
            audit_id: Some(audit_id),
            rollback_info,
            ..MergeResult::default()
        };
        if let Some(conflicts) = conflicts {
            result
                .warnings
                .push(format!("{} field conflicts recorded in _merge_info", conflicts));
        }
        result
    }

    fn admits(&self, proposal: &MergeProposal, auto_approved: bool) -> bool {
        if proposal.strategy == MergeStrategy::ManualOnly && !auto_approved {
            return false;
        }
        if self.options.enable_safety_checks && !proposal.safety_flags.is_empty() {
            return false;
        }
        if !auto_approved && proposal.confidence < self.options.auto_approve_threshold {
            return false;
        }
        true
    }

    pub fn stats(&self) -> MergeEngineStats {
        MergeEngineStats {
            proposals: self.proposals.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            safety_blocks: self.safety_blocks.load(Ordering::Relaxed),
        }
    }
}

fn select_strategy(
    confidence: f64,
    risk_factors: &[String],
    safety_flags: &[SafetyFlag],
) -> MergeStrategy {
    if confidence >= 95.0 && risk_factors.is_empty() && safety_flags.is_empty() {
        MergeStrategy::Aggressive
    } else if confidence < 80.0 || !safety_flags.is_empty() {
        MergeStrategy::ManualOnly
    } else {
        MergeStrategy::Conservative
    }
}

/// Merge `secondary` into a copy of `primary`.
///
/// The primary's `id` is always preserved. List-semantics fields union and
/// never conflict; scalar disagreements keep the primary value, recorded in
/// `_merge_info.conflicts` when `record_conflicts` is set. Returns the
/// merged record and the number of conflicts recorded.
fn merge_records(
    primary: &Record,
    secondary: &Record,
    confidence: f64,
    strategy: MergeStrategy,
    record_conflicts: bool,
) -> (Record, Option<usize>) {
    let mut result = primary.clone();
    let mut conflicts = serde_json::Map::new();

    for (key, value) in secondary.fields() {
        if key == "id" || key.starts_with('_') {
            continue;
        }
        if secondary.is_empty_field(key) {
            continue;
        }
        if result.is_empty_field(key) {
            result.insert(key.clone(), value.clone());
            continue;
        }

        let existing = result.get(key).cloned().unwrap_or(Value::Null);
        if existing.is_array() || value.is_array() {
            let mut union = result.value_set(key);
            union.extend(secondary.value_set(key));
            let items: Vec<Value> = union.into_iter().map(Value::String).collect();
            result.insert(key.clone(), Value::Array(items));
            continue;
        }

        if values_equal(&existing, value) {
            continue;
        }
        if record_conflicts {
            conflicts.insert(
                key.clone(),
                json!({"primary": existing, "secondary": value}),
            );
        }
        // Keep the primary's value.
    }

    let conflict_count = conflicts.len();
    let merge_info = json!({
        "merged_from": [primary.id(), secondary.id()],
        "confidence": confidence,
        "timestamp": Utc::now().to_rfc3339(),
        "strategy": strategy.slug(),
        "conflicts": if conflicts.is_empty() { Value::Null } else { Value::Object(conflicts) },
    });
    result.insert("_merge_info", merge_info);

    let recorded = if record_conflicts { Some(conflict_count) } else { None };
    (result, recorded.filter(|n| *n > 0))
}

/// Scalar equality after normalization: strings compare trimmed and
/// case-insensitive, everything else structurally.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(sa), Value::String(sb)) => {
            sa.trim().eq_ignore_ascii_case(sb.trim())
        }
        _ => a == b,
    }
}

fn validate_merged(merged: &Record) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    if merged.text("name").is_empty() && merged.text("organization_name").is_empty() {
        errors.push("merged record missing identifying name".to_string());
    }
    let size = serde_json::to_string(&merged.to_value())
        .map(|s| s.len())
        .unwrap_or(usize::MAX);
    if size > MAX_MERGED_BYTES {
        errors.push("merged record exceeds size limit".to_string());
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use coalesce_audit::AuditOp;

    use super::*;

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(&value).expect("object")
    }

    fn engine() -> MergeEngine {
        let path = std::env::temp_dir().join(format!("coalesce-merge-{}.redb", Uuid::new_v4()));
        let store = Arc::new(AuditStore::open(path).expect("open store"));
        MergeEngine::new(store, MergeOptions::default())
    }

    #[test]
    fn clean_high_confidence_pairs_select_aggressive() {
        let engine = engine();
        let a = record(json!({"id": "a", "name": "Jane Doe", "email": "j@x.com"}));
        let b = record(json!({"id": "b", "name": "Jane Doe", "email": "j@x.com"}));
        let proposal =
            engine.create_proposal(a, b, 97.0, json!({}), EntityType::Person, None);
        assert_eq!(proposal.strategy, MergeStrategy::Aggressive);
        assert!(proposal.safety_flags.is_empty());
    }

    #[test]
    fn low_confidence_selects_manual_only() {
        let engine = engine();
        let a = record(json!({"id": "a", "name": "Jane Doe"}));
        let b = record(json!({"id": "b", "name": "Jane D"}));
        let proposal = engine.create_proposal(a, b, 65.0, json!({}), EntityType::Person, None);
        assert_eq!(proposal.strategy, MergeStrategy::ManualOnly);
    }

    #[test]
    fn safety_flags_force_manual_only() {
        let engine = engine();
        let a = record(json!({"id": "a", "name": "Jane", "email": "j@one.com"}));
        let b = record(json!({"id": "b", "name": "Jane", "email": "j@two.com"}));
        let proposal = engine.create_proposal(a, b, 96.0, json!({}), EntityType::Person, None);
        assert!(proposal.safety_flags.contains(&SafetyFlag::ConflictingIdentifiers));
        assert_eq!(proposal.strategy, MergeStrategy::ManualOnly);
    }

    #[test]
    fn gate_blocks_flagged_proposals_even_when_approved() {
        let engine = engine();
        let a = record(json!({"id": "a", "name": "Jane", "email": "j@one.com"}));
        let b = record(json!({"id": "b", "name": "Jane", "email": "j@two.com"}));
        let mut proposal = engine.create_proposal(a, b, 96.0, json!({}), EntityType::Person, None);
        let result = engine.execute(&mut proposal, "people", "system", true);
        assert!(!result.success);
        assert_eq!(result.errors, vec!["blocked by safety".to_string()]);
        assert!(result.audit_id.is_none());
        assert_eq!(engine.stats().safety_blocks, 1);
        // No merge audit row was written.
        assert!(engine.store.history(None, Some(AuditOp::Merge), 30).unwrap().is_empty());
    }

    #[test]
    fn gate_blocks_unapproved_merges_below_threshold() {
        let engine = engine();
        let a = record(json!({"id": "a", "name": "Jane Doe"}));
        let b = record(json!({"id": "b", "name": "Jane Doe"}));
        let mut proposal = engine.create_proposal(a, b, 85.0, json!({}), EntityType::Person, None);
        assert_eq!(proposal.strategy, MergeStrategy::Conservative);
        let result = engine.execute(&mut proposal, "people", "system", false);
        assert!(!result.success);
    }

    #[test]
    fn conservative_merge_fills_gaps_and_records_conflicts() {
        let engine = engine();
        let a = record(json!({"id": "a", "name": "Jane Doe", "role": "Clerk"}));
        let b = record(json!({
            "id": "b",
            "name": "Jane Doe",
            "role": "Treasurer",
            "phone": "01234567890"
        }));
        let mut proposal = engine.create_proposal(a, b, 92.0, json!({}), EntityType::Person, None);
        let result = engine.execute(&mut proposal, "people", "system", true);
        assert!(result.success, "errors: {:?}", result.errors);

        let merged = result.merged.unwrap();
        assert_eq!(merged.id(), "a");
        assert_eq!(merged.text("role"), "Clerk");
        assert_eq!(merged.text("phone"), "01234567890");

        let info = merged.get("_merge_info").unwrap();
        assert_eq!(info["merged_from"], json!(["a", "b"]));
        assert_eq!(info["strategy"], "conservative");
        assert_eq!(info["conflicts"]["role"]["secondary"], "Treasurer");
        assert_eq!(proposal.status, ProposalStatus::Executed);
    }

    #[test]
    fn list_identifiers_union_instead_of_conflicting() {
        let engine = engine();
        let a = record(json!({"id": "a", "name": "Jane", "email": ["j@x.com", "j@y.com"]}));
        let b = record(json!({"id": "b", "name": "Jane", "email": "j@x.com"}));
        let mut proposal = engine.create_proposal(a, b, 96.0, json!({}), EntityType::Person, None);
        assert!(proposal.safety_flags.is_empty());
        let result = engine.execute(&mut proposal, "people", "system", true);
        assert!(result.success);

        let merged = result.merged.unwrap();
        let emails = merged.value_set("email");
        assert_eq!(emails.len(), 2);
        assert!(emails.contains("j@x.com"));
        assert!(emails.contains("j@y.com"));
        assert!(merged.get("_merge_info").unwrap()["conflicts"].is_null());
    }

    #[test]
    fn aggressive_merge_drops_conflict_records() {
        let engine = engine();
        let a = record(json!({"id": "a", "name": "Jane Doe", "role": "Clerk", "email": "j@x.com"}));
        let b = record(json!({"id": "b", "name": "Jane Doe", "role": "Treasurer", "email": "j@x.com"}));
        let mut proposal = engine.create_proposal(a, b, 92.0, json!({}), EntityType::Person, None);
        proposal.strategy = MergeStrategy::Aggressive;
        let result = engine.execute(&mut proposal, "people", "system", true);
        assert!(result.success);
        let merged = result.merged.unwrap();
        assert_eq!(merged.text("role"), "Clerk");
        assert!(merged.get("_merge_info").unwrap()["conflicts"].is_null());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn merging_a_record_with_itself_is_idempotent() {
        let engine = engine();
        let a = record(json!({
            "id": "a",
            "name": "jane doe",
            "email": ["j@x.com"],
            "role": "clerk"
        }));
        let mut proposal =
            engine.create_proposal(a.clone(), a.clone(), 99.0, json!({}), EntityType::Person, None);
        let result = engine.execute(&mut proposal, "people", "system", true);
        assert!(result.success);
        let merged = result.merged.unwrap();
        assert_eq!(merged.id(), "a");
        assert_eq!(merged.text("name"), "jane doe");
        assert_eq!(merged.text("role"), "clerk");
        assert_eq!(merged.value_set("email"), a.value_set("email"));
        assert!(merged.get("_merge_info").unwrap()["conflicts"].is_null());
    }

    #[test]
    fn successful_merges_write_an_audit_row() {
        let engine = engine();
        let a = record(json!({"id": "a", "name": "Jane Doe"}));
        let b = record(json!({"id": "b", "name": "Jane Doe", "role": "Clerk"}));
        let mut proposal = engine.create_proposal(a, b, 96.0, json!({}), EntityType::Person, None);
        let result = engine.execute(&mut proposal, "people", "system", true);
        assert!(result.success);

        let history = engine.store.history(Some("people"), Some(AuditOp::Merge), 30).unwrap();
        assert_eq!(history.len(), 1);
        let row = &history[0];
        assert_eq!(row.entity_ids, vec!["a", "b"]);
        assert!(row.before_state["primary_entity"]["name"].is_string());
        assert!(row.after_state["merged_entity"]["_merge_info"].is_object());
        assert!(row.rollback_info["original_entities"].is_array());
    }

    #[test]
    fn merged_record_must_keep_an_identifying_name() {
        let engine = engine();
        let a = record(json!({"id": "a", "notes": "anonymous"}));
        let b = record(json!({"id": "b", "notes": "also anonymous"}));
        let mut proposal = engine.create_proposal(a, b, 97.0, json!({}), EntityType::Document, None);
        let result = engine.execute(&mut proposal, "docs", "system", true);
        assert!(!result.success);
        assert!(result.errors[0].contains("identifying name"));
        assert_eq!(proposal.status, ProposalStatus::Failed);
    }
}
