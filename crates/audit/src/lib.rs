//! Durable audit store for review tasks and decision records.
//!
//! Backed by [`redb`]: three primary tables plus secondary index tables
//! maintained in the same write transaction.
//!
//! # Tables
//!
//! | Name                     | Key                   | Value                          |
//! |--------------------------|-----------------------|--------------------------------|
//! | `review_tasks`           | task UUID (str)       | JSON [`ReviewTask`]            |
//! | `task_status_index`      | status slug           | newline-separated task UUIDs   |
//! | `task_priority_index`    | priority slug         | newline-separated task UUIDs   |
//! | `audit_records`          | audit UUID (str)      | JSON [`AuditRecord`]           |
//! | `audit_ts_index`         | zero-padded nanos + audit UUID | audit UUID            |
//! | `audit_collection_index` | collection name       | newline-separated audit UUIDs  |
//! | `quality_metrics`        | auto-increment u64    | JSON [`QualityMetric`]         |
//!
//! Audit records are append-only: nothing in this module updates or deletes
//! a row in `audit_records`; a rollback appends a new inverted record.
//! Writers are serialized by redb's single write transaction; concurrent
//! readers are unaffected.

pub mod schema;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use uuid::Uuid;

use coalesce_types::AiSignal;

pub use schema::{
    ActivityStats, AuditOp, AuditRecord, QualityMetric, QualitySummary, ReviewDecision, ReviewTask,
    TaskPriority, TaskStatus,
};

// ── table definitions ─────────────────────────────────────────────────────────

const REVIEW_TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("review_tasks");
const TASK_STATUS_INDEX: TableDefinition<&str, &str> = TableDefinition::new("task_status_index");
const TASK_PRIORITY_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("task_priority_index");
const AUDIT_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_records");
const AUDIT_TS_INDEX: TableDefinition<&str, &str> = TableDefinition::new("audit_ts_index");
const AUDIT_COLLECTION_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("audit_collection_index");
const QUALITY_METRICS: TableDefinition<u64, &[u8]> = TableDefinition::new("quality_metrics");

// ── store ─────────────────────────────────────────────────────────────────────

pub struct AuditStore {
    db: Database,
    path: PathBuf,
}

impl AuditStore {
    /// Open or create the audit database at `path`, ensuring all tables
    /// exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening audit store at {}", path.display()))?;

        {
            let tx = db.begin_write()?;
            tx.open_table(REVIEW_TASKS)?;
            tx.open_table(TASK_STATUS_INDEX)?;
            tx.open_table(TASK_PRIORITY_INDEX)?;
            tx.open_table(AUDIT_RECORDS)?;
            tx.open_table(AUDIT_TS_INDEX)?;
            tx.open_table(AUDIT_COLLECTION_INDEX)?;
            tx.open_table(QUALITY_METRICS)?;
            tx.commit()?;
        }

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── review tasks ──────────────────────────────────────────────────────────

    /// Create a pending review task and return its id.
    pub fn create_task(
        &self,
        collection: &str,
        pair_payload: Value,
        priority: TaskPriority,
        ai_signal: Option<AiSignal>,
    ) -> Result<Uuid> {
        let task = ReviewTask {
            task_id: Uuid::new_v4(),
            collection: collection.to_string(),
            pair_payload,
            priority,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            assigned_to: None,
            completed_at: None,
            decision: None,
            reviewer_notes: None,
            reviewer_confidence: None,
            ai_signal,
        };

        let tx = self.db.begin_write()?;
        {
            let mut tasks = tx.open_table(REVIEW_TASKS)?;
            let id = task.task_id.to_string();
            tasks.insert(id.as_str(), serde_json::to_vec(&task)?.as_slice())?;

            let mut status_idx = tx.open_table(TASK_STATUS_INDEX)?;
            add_to_index(&mut status_idx, task.status.slug(), &id)?;
            let mut priority_idx = tx.open_table(TASK_PRIORITY_INDEX)?;
            add_to_index(&mut priority_idx, task.priority.slug(), &id)?;
        }
        tx.commit()?;

        tracing::info!(
            task_id = %task.task_id,
            collection,
            priority = priority.slug(),
            "review task created"
        );
        Ok(task.task_id)
    }

    /// Atomically move a pending task to in-progress for `reviewer`.
    ///
    /// Returns `false` when the task is missing or not pending.
    pub fn assign(&self, task_id: Uuid, reviewer: &str) -> Result<bool> {
        let tx = self.db.begin_write()?;
        let assigned = {
            let mut tasks = tx.open_table(REVIEW_TASKS)?;
            let id = task_id.to_string();
            match load_task(&tasks, &id)? {
                Some(mut task) if task.status == TaskStatus::Pending => {
                    task.status = TaskStatus::InProgress;
                    task.assigned_to = Some(reviewer.to_string());
                    tasks.insert(id.as_str(), serde_json::to_vec(&task)?.as_slice())?;

                    let mut status_idx = tx.open_table(TASK_STATUS_INDEX)?;
                    move_in_index(
                        &mut status_idx,
                        TaskStatus::Pending.slug(),
                        TaskStatus::InProgress.slug(),
                        &id,
                    )?;
                    true
                }
                _ => false,
            }
        };
        if assigned {
            tx.commit()?;
            tracing::info!(task_id = %task_id, reviewer, "review task assigned");
        } else {
            tx.abort()?;
        }
        Ok(assigned)
    }

    /// Atomically complete an in-progress task owned by `reviewer` and emit
    /// a `ReviewCompleted` audit row (plus a `Separate` row when the
    /// decision keeps the pair apart).
    ///
    /// Returns `false` when the task is missing, not in progress, or
    /// assigned to someone else.
    pub fn complete(
        &self,
        task_id: Uuid,
        reviewer: &str,
        decision: ReviewDecision,
        confidence: f64,
        notes: Option<String>,
    ) -> Result<bool> {
        let tx = self.db.begin_write()?;
        {
            let mut tasks = tx.open_table(REVIEW_TASKS)?;
            let id = task_id.to_string();
            let eligible = match load_task(&tasks, &id)? {
                Some(task)
                    if task.status == TaskStatus::InProgress
                        && task.assigned_to.as_deref() == Some(reviewer) =>
                {
                    Some(task)
                }
                _ => None,
            };
            let Some(mut task) = eligible else {
                drop(tasks);
                tx.abort()?;
                return Ok(false);
            };

            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
            task.decision = Some(decision);
            task.reviewer_notes = notes;
            task.reviewer_confidence = Some(confidence);
            tasks.insert(id.as_str(), serde_json::to_vec(&task)?.as_slice())?;

            let mut status_idx = tx.open_table(TASK_STATUS_INDEX)?;
            move_in_index(
                &mut status_idx,
                TaskStatus::InProgress.slug(),
                TaskStatus::Completed.slug(),
                &id,
            )?;

            let entity_ids = pair_entity_ids(&task.pair_payload);
            let mut records = tx.open_table(AUDIT_RECORDS)?;
            let mut ts_idx = tx.open_table(AUDIT_TS_INDEX)?;
            let mut coll_idx = tx.open_table(AUDIT_COLLECTION_INDEX)?;

            let review_record = AuditRecord {
                audit_id: Uuid::new_v4(),
                op: AuditOp::ReviewCompleted,
                collection: task.collection.clone(),
                entity_ids: entity_ids.clone(),
                actor: reviewer.to_string(),
                timestamp: Utc::now(),
                confidence,
                evidence: serde_json::json!({
                    "review_task_id": id,
                    "decision": decision.slug(),
                }),
                before_state: serde_json::json!({"status": "pending_review"}),
                after_state: serde_json::json!({"status": "reviewed", "decision": decision.slug()}),
                rollback_info: serde_json::json!({"review_task_id": id}),
                ai_signal: task.ai_signal.clone(),
            };
            insert_audit(&mut records, &mut ts_idx, &mut coll_idx, &review_record)?;

            if decision == ReviewDecision::Separate {
                let separate_record = AuditRecord {
                    audit_id: Uuid::new_v4(),
                    op: AuditOp::Separate,
                    collection: task.collection.clone(),
                    entity_ids,
                    actor: reviewer.to_string(),
                    timestamp: Utc::now(),
                    confidence,
                    evidence: serde_json::json!({"review_task_id": id}),
                    before_state: serde_json::json!({"status": "candidate_pair"}),
                    after_state: serde_json::json!({"status": "kept_separate"}),
                    rollback_info: serde_json::json!({"review_task_id": id}),
                    ai_signal: None,
                };
                insert_audit(&mut records, &mut ts_idx, &mut coll_idx, &separate_record)?;
            }
        }
        tx.commit()?;
        tracing::info!(task_id = %task_id, decision = decision.slug(), "review task completed");
        Ok(true)
    }

    /// Cancel a pending task. Returns `false` for any other state.
    pub fn cancel_task(&self, task_id: Uuid) -> Result<bool> {
        let tx = self.db.begin_write()?;
        let cancelled = {
            let mut tasks = tx.open_table(REVIEW_TASKS)?;
            let id = task_id.to_string();
            match load_task(&tasks, &id)? {
                Some(mut task) if task.status == TaskStatus::Pending => {
                    task.status = TaskStatus::Cancelled;
                    tasks.insert(id.as_str(), serde_json::to_vec(&task)?.as_slice())?;
                    let mut status_idx = tx.open_table(TASK_STATUS_INDEX)?;
                    move_in_index(
                        &mut status_idx,
                        TaskStatus::Pending.slug(),
                        TaskStatus::Cancelled.slug(),
                        &id,
                    )?;
                    true
                }
                _ => false,
            }
        };
        if cancelled {
            tx.commit()?;
        } else {
            tx.abort()?;
        }
        Ok(cancelled)
    }

    pub fn get_task(&self, task_id: Uuid) -> Result<Option<ReviewTask>> {
        let tx = self.db.begin_read()?;
        let tasks = tx.open_table(REVIEW_TASKS)?;
        let id = task_id.to_string();
        match tasks.get(id.as_str())? {
            None => Ok(None),
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        }
    }

    /// Pending tasks ordered by creation time ascending, optionally filtered
    /// by assignee and priority.
    pub fn list_pending(
        &self,
        reviewer: Option<&str>,
        priority: Option<TaskPriority>,
    ) -> Result<Vec<ReviewTask>> {
        let tx = self.db.begin_read()?;
        let status_idx = tx.open_table(TASK_STATUS_INDEX)?;
        let ids = read_index(&status_idx, TaskStatus::Pending.slug())?;
        let tasks_table = tx.open_table(REVIEW_TASKS)?;

        let mut tasks = Vec::new();
        for id in ids {
            let Some(task) = load_task(&tasks_table, &id)? else {
                continue;
            };
            if let Some(reviewer) = reviewer {
                if task.assigned_to.as_deref() != Some(reviewer) {
                    continue;
                }
            }
            if let Some(priority) = priority {
                if task.priority != priority {
                    continue;
                }
            }
            tasks.push(task);
        }
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    // ── audit records ─────────────────────────────────────────────────────────

    /// Append a merge audit row carrying full before/after states and the
    /// information needed to roll the merge back.
    #[allow(clippy::too_many_arguments)]
    pub fn record_merge(
        &self,
        collection: &str,
        primary: &Value,
        secondary: &Value,
        merged: &Value,
        actor: &str,
        confidence: f64,
        evidence: Value,
        ai_signal: Option<AiSignal>,
    ) -> Result<Uuid> {
        let now = Utc::now();
        let record = AuditRecord {
            audit_id: Uuid::new_v4(),
            op: AuditOp::Merge,
            collection: collection.to_string(),
            entity_ids: vec![value_id(primary), value_id(secondary)],
            actor: actor.to_string(),
            timestamp: now,
            confidence,
            evidence,
            before_state: serde_json::json!({
                "primary_entity": primary,
                "secondary_entity": secondary,
            }),
            after_state: serde_json::json!({
                "merged_entity": merged,
                "archived_entity": secondary,
            }),
            rollback_info: serde_json::json!({
                "original_entities": [primary, secondary],
                "merge_timestamp": now.to_rfc3339(),
            }),
            ai_signal,
        };

        let tx = self.db.begin_write()?;
        {
            let mut records = tx.open_table(AUDIT_RECORDS)?;
            let mut ts_idx = tx.open_table(AUDIT_TS_INDEX)?;
            let mut coll_idx = tx.open_table(AUDIT_COLLECTION_INDEX)?;
            insert_audit(&mut records, &mut ts_idx, &mut coll_idx, &record)?;
        }
        tx.commit()?;
        tracing::info!(audit_id = %record.audit_id, collection, "merge recorded");
        Ok(record.audit_id)
    }

    pub fn get_audit(&self, audit_id: Uuid) -> Result<Option<AuditRecord>> {
        let tx = self.db.begin_read()?;
        let records = tx.open_table(AUDIT_RECORDS)?;
        let id = audit_id.to_string();
        match records.get(id.as_str())? {
            None => Ok(None),
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        }
    }

    /// Audit history within the lookback window, newest first.
    pub fn history(
        &self,
        collection: Option<&str>,
        op: Option<AuditOp>,
        days_back: i64,
    ) -> Result<Vec<AuditRecord>> {
        let cutoff = Utc::now() - Duration::days(days_back);
        let cutoff_key = format!("{:020}|", nanos_of(&cutoff));

        let tx = self.db.begin_read()?;
        let ts_idx = tx.open_table(AUDIT_TS_INDEX)?;
        let records_table = tx.open_table(AUDIT_RECORDS)?;

        let mut records = Vec::new();
        for entry in ts_idx.range(cutoff_key.as_str()..)? {
            let (_, id_guard) = entry?;
            let id = id_guard.value().to_string();
            let Some(guard) = records_table.get(id.as_str())? else {
                continue;
            };
            let record: AuditRecord = serde_json::from_slice(guard.value())?;
            if let Some(collection) = collection {
                if record.collection != collection {
                    continue;
                }
            }
            if let Some(op) = op {
                if record.op != op {
                    continue;
                }
            }
            records.push(record);
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Append a rollback record inverting the original's before/after
    /// states. The original row is left untouched.
    ///
    /// Returns `false` when the original audit record does not exist.
    pub fn rollback(&self, audit_id: Uuid, reason: &str) -> Result<bool> {
        let Some(original) = self.get_audit(audit_id)? else {
            tracing::warn!(audit_id = %audit_id, "rollback requested for unknown audit record");
            return Ok(false);
        };

        let record = AuditRecord {
            audit_id: Uuid::new_v4(),
            op: AuditOp::Rollback,
            collection: original.collection.clone(),
            entity_ids: original.entity_ids.clone(),
            actor: "system".to_string(),
            timestamp: Utc::now(),
            confidence: 100.0,
            evidence: serde_json::json!({
                "original_audit_id": audit_id.to_string(),
                "rollback_reason": reason,
            }),
            before_state: original.after_state.clone(),
            after_state: original.before_state.clone(),
            rollback_info: serde_json::json!({"original_operation": original.op.slug()}),
            ai_signal: None,
        };

        let tx = self.db.begin_write()?;
        {
            let mut records = tx.open_table(AUDIT_RECORDS)?;
            let mut ts_idx = tx.open_table(AUDIT_TS_INDEX)?;
            let mut coll_idx = tx.open_table(AUDIT_COLLECTION_INDEX)?;
            insert_audit(&mut records, &mut ts_idx, &mut coll_idx, &record)?;
        }
        tx.commit()?;
        tracing::info!(audit_id = %audit_id, rollback_id = %record.audit_id, "operation rolled back");
        Ok(true)
    }

    // ── quality metrics ───────────────────────────────────────────────────────

    /// Append one quality metric sample.
    pub fn record_metric(
        &self,
        metric_type: &str,
        metric_value: f64,
        details: Option<Value>,
    ) -> Result<()> {
        let metric = QualityMetric {
            date: Utc::now(),
            metric_type: metric_type.to_string(),
            metric_value,
            details,
        };
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(QUALITY_METRICS)?;
            let next_id = table.last()?.map(|(k, _)| k.value() + 1).unwrap_or(0);
            table.insert(next_id, serde_json::to_vec(&metric)?.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Completed-review decisions and audit ops over the window, with counts
    /// and mean confidence per kind.
    pub fn quality_summary(&self, days_back: i64) -> Result<QualitySummary> {
        let cutoff = Utc::now() - Duration::days(days_back);
        let mut summary = QualitySummary {
            period_days: days_back,
            ..QualitySummary::default()
        };

        let tx = self.db.begin_read()?;

        let tasks = tx.open_table(REVIEW_TASKS)?;
        let mut decision_sums: std::collections::BTreeMap<String, (usize, f64)> = Default::default();
        for entry in tasks.iter()? {
            let (_, guard) = entry?;
            let task: ReviewTask = serde_json::from_slice(guard.value())?;
            let (Some(completed_at), Some(decision)) = (task.completed_at, task.decision) else {
                continue;
            };
            if completed_at < cutoff {
                continue;
            }
            let entry = decision_sums.entry(decision.slug().to_string()).or_default();
            entry.0 += 1;
            entry.1 += task.reviewer_confidence.unwrap_or(0.0);
        }
        for (decision, (count, total)) in decision_sums {
            summary.review_decisions.insert(
                decision,
                ActivityStats {
                    count,
                    mean_confidence: if count > 0 { total / count as f64 } else { 0.0 },
                },
            );
        }

        let records = tx.open_table(AUDIT_RECORDS)?;
        let mut op_sums: std::collections::BTreeMap<String, (usize, f64)> = Default::default();
        for entry in records.iter()? {
            let (_, guard) = entry?;
            let record: AuditRecord = serde_json::from_slice(guard.value())?;
            if record.timestamp < cutoff {
                continue;
            }
            let entry = op_sums.entry(record.op.slug().to_string()).or_default();
            entry.0 += 1;
            entry.1 += record.confidence;
        }
        for (op, (count, total)) in op_sums {
            summary.operations.insert(
                op,
                ActivityStats {
                    count,
                    mean_confidence: if count > 0 { total / count as f64 } else { 0.0 },
                },
            );
        }

        Ok(summary)
    }

    /// Cheap counters for the driver's `stats` surface.
    pub fn stats(&self) -> Result<StoreStats> {
        let tx = self.db.begin_read()?;
        let status_idx = tx.open_table(TASK_STATUS_INDEX)?;
        let mut tasks_by_status = std::collections::BTreeMap::new();
        for entry in status_idx.iter()? {
            let (key, value) = entry?;
            let count = value.value().lines().filter(|l| !l.is_empty()).count();
            tasks_by_status.insert(key.value().to_string(), count);
        }

        let records = tx.open_table(AUDIT_RECORDS)?;
        let mut audits_by_op = std::collections::BTreeMap::new();
        for entry in records.iter()? {
            let (_, guard) = entry?;
            let record: AuditRecord = serde_json::from_slice(guard.value())?;
            *audits_by_op.entry(record.op.slug().to_string()).or_insert(0) += 1;
        }

        Ok(StoreStats {
            tasks_by_status,
            audits_by_op,
        })
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub tasks_by_status: std::collections::BTreeMap<String, usize>,
    pub audits_by_op: std::collections::BTreeMap<String, usize>,
}

// ── helpers ───────────────────────────────────────────────────────────────────

fn load_task(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    id: &str,
) -> Result<Option<ReviewTask>> {
    match table.get(id)? {
        None => Ok(None),
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
    }
}

fn insert_audit(
    records: &mut redb::Table<&str, &[u8]>,
    ts_idx: &mut redb::Table<&str, &str>,
    coll_idx: &mut redb::Table<&str, &str>,
    record: &AuditRecord,
) -> Result<()> {
    let id = record.audit_id.to_string();
    records.insert(id.as_str(), serde_json::to_vec(record)?.as_slice())?;
    let ts_key = format!("{:020}|{}", nanos_of(&record.timestamp), id);
    ts_idx.insert(ts_key.as_str(), id.as_str())?;
    add_to_index(coll_idx, &record.collection, &id)?;
    Ok(())
}

fn add_to_index(table: &mut redb::Table<&str, &str>, key: &str, id: &str) -> Result<()> {
    let existing = table
        .get(key)?
        .map(|v| v.value().to_string())
        .unwrap_or_default();
    let updated = if existing.is_empty() {
        id.to_string()
    } else {
        format!("{existing}\n{id}")
    };
    table.insert(key, updated.as_str())?;
    Ok(())
}

fn move_in_index(
    table: &mut redb::Table<&str, &str>,
    from: &str,
    to: &str,
    id: &str,
) -> Result<()> {
    let existing = table
        .get(from)?
        .map(|v| v.value().to_string())
        .unwrap_or_default();
    let remaining: Vec<&str> = existing.lines().filter(|l| *l != id).collect();
    table.insert(from, remaining.join("\n").as_str())?;
    add_to_index(table, to, id)
}

fn read_index(
    table: &impl ReadableTable<&'static str, &'static str>,
    key: &str,
) -> Result<Vec<String>> {
    Ok(table
        .get(key)?
        .map(|v| v.value().to_string())
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

fn nanos_of(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn value_id(value: &Value) -> String {
    value
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn pair_entity_ids(payload: &Value) -> Vec<String> {
    ["entity_a", "entity_b"]
        .iter()
        .map(|side| {
            payload
                .get(side)
                .map(value_id)
                .unwrap_or_else(|| "unknown".to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn temp_store() -> AuditStore {
        let path = std::env::temp_dir().join(format!("coalesce-audit-{}.redb", Uuid::new_v4()));
        AuditStore::open(path).expect("open store")
    }

    fn sample_payload() -> Value {
        json!({
            "entity_a": {"id": "p1", "name": "Anthony Smith"},
            "entity_b": {"id": "p2", "name": "Tony Smith"},
            "confidence": 87.5,
        })
    }

    #[test]
    fn task_lifecycle_pending_in_progress_completed() -> anyhow::Result<()> {
        let store = temp_store();
        let task_id = store.create_task("people", sample_payload(), TaskPriority::Medium, None)?;

        let task = store.get_task(task_id)?.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_to.is_none());

        assert!(store.assign(task_id, "alice")?);
        let task = store.get_task(task_id)?.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_to.as_deref(), Some("alice"));

        assert!(store.complete(task_id, "alice", ReviewDecision::Merge, 92.0, None)?);
        let task = store.get_task(task_id)?.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.decision, Some(ReviewDecision::Merge));
        assert!(task.completed_at.is_some());
        Ok(())
    }

    #[test]
    fn illegal_transitions_are_refused() -> anyhow::Result<()> {
        let store = temp_store();
        let task_id = store.create_task("people", sample_payload(), TaskPriority::Low, None)?;

        // Complete before assign.
        assert!(!store.complete(task_id, "alice", ReviewDecision::Merge, 90.0, None)?);

        assert!(store.assign(task_id, "alice")?);
        // Second assignment of the same task.
        assert!(!store.assign(task_id, "bob")?);
        // Completion by the wrong reviewer.
        assert!(!store.complete(task_id, "bob", ReviewDecision::Merge, 90.0, None)?);
        // Cancel is only legal from pending.
        assert!(!store.cancel_task(task_id)?);

        assert!(store.complete(task_id, "alice", ReviewDecision::Defer, 60.0, None)?);
        // Completed tasks cannot be re-completed.
        assert!(!store.complete(task_id, "alice", ReviewDecision::Merge, 90.0, None)?);
        Ok(())
    }

    #[test]
    fn pending_tasks_can_be_cancelled() -> anyhow::Result<()> {
        let store = temp_store();
        let task_id = store.create_task("people", sample_payload(), TaskPriority::Low, None)?;
        assert!(store.cancel_task(task_id)?);
        let task = store.get_task(task_id)?.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(store.list_pending(None, None)?.is_empty());
        Ok(())
    }

    #[test]
    fn list_pending_orders_and_filters() -> anyhow::Result<()> {
        let store = temp_store();
        let first = store.create_task("people", sample_payload(), TaskPriority::High, None)?;
        let second = store.create_task("people", sample_payload(), TaskPriority::Low, None)?;
        let third = store.create_task("people", sample_payload(), TaskPriority::High, None)?;

        let all = store.list_pending(None, None)?;
        assert_eq!(
            all.iter().map(|t| t.task_id).collect::<Vec<_>>(),
            vec![first, second, third]
        );

        let high = store.list_pending(None, Some(TaskPriority::High))?;
        assert_eq!(high.len(), 2);
        assert!(high.iter().all(|t| t.priority == TaskPriority::High));

        // Assigned tasks leave the pending list entirely.
        assert!(store.assign(first, "alice")?);
        assert_eq!(store.list_pending(None, None)?.len(), 2);
        Ok(())
    }

    #[test]
    fn completing_a_review_emits_an_audit_row() -> anyhow::Result<()> {
        let store = temp_store();
        let task_id = store.create_task("people", sample_payload(), TaskPriority::Medium, None)?;
        store.assign(task_id, "alice")?;
        store.complete(task_id, "alice", ReviewDecision::Merge, 88.0, Some("same person".into()))?;

        let history = store.history(None, Some(AuditOp::ReviewCompleted), 30)?;
        assert_eq!(history.len(), 1);
        let record = &history[0];
        assert_eq!(record.actor, "alice");
        assert_eq!(record.entity_ids, vec!["p1", "p2"]);
        assert_eq!(record.evidence["decision"], "merge");
        Ok(())
    }

    #[test]
    fn separate_decisions_also_record_a_separate_op() -> anyhow::Result<()> {
        let store = temp_store();
        let task_id = store.create_task("people", sample_payload(), TaskPriority::Medium, None)?;
        store.assign(task_id, "alice")?;
        store.complete(task_id, "alice", ReviewDecision::Separate, 75.0, None)?;

        assert_eq!(store.history(None, Some(AuditOp::Separate), 30)?.len(), 1);
        assert_eq!(store.history(None, Some(AuditOp::ReviewCompleted), 30)?.len(), 1);
        Ok(())
    }

    #[test]
    fn merge_history_filters_by_collection_and_op() -> anyhow::Result<()> {
        let store = temp_store();
        let primary = json!({"id": "a", "name": "Acme"});
        let secondary = json!({"id": "b", "name": "ACME Ltd"});
        let merged = json!({"id": "a", "name": "Acme", "_merge_info": {}});
        store.record_merge("orgs", &primary, &secondary, &merged, "system", 96.0, json!({}), None)?;
        store.record_merge("people", &primary, &secondary, &merged, "system", 91.0, json!({}), None)?;

        assert_eq!(store.history(Some("orgs"), None, 30)?.len(), 1);
        assert_eq!(store.history(None, Some(AuditOp::Merge), 30)?.len(), 2);
        assert_eq!(store.history(Some("orgs"), Some(AuditOp::Rollback), 30)?.len(), 0);
        Ok(())
    }

    #[test]
    fn history_is_newest_first() -> anyhow::Result<()> {
        let store = temp_store();
        let a = json!({"id": "a"});
        let b = json!({"id": "b"});
        let merged = json!({"id": "a"});
        store.record_merge("orgs", &a, &b, &merged, "system", 90.0, json!({}), None)?;
        store.record_merge("orgs", &a, &b, &merged, "system", 95.0, json!({}), None)?;
        let history = store.history(Some("orgs"), None, 30)?;
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp >= history[1].timestamp);
        Ok(())
    }

    #[test]
    fn rollback_appends_inverted_record_and_preserves_original() -> anyhow::Result<()> {
        let store = temp_store();
        let primary = json!({"id": "a", "name": "Acme"});
        let secondary = json!({"id": "b", "name": "ACME Ltd"});
        let merged = json!({"id": "a", "name": "Acme", "_merge_info": {"merged_from": ["a", "b"]}});
        let audit_id =
            store.record_merge("orgs", &primary, &secondary, &merged, "system", 96.0, json!({}), None)?;

        assert!(store.rollback(audit_id, "test")?);

        let history = store.history(Some("orgs"), None, 30)?;
        assert_eq!(history.len(), 2);

        let original = store.get_audit(audit_id)?.unwrap();
        let rollback = history
            .iter()
            .find(|r| r.op == AuditOp::Rollback)
            .expect("rollback row");
        assert_eq!(rollback.before_state, original.after_state);
        assert_eq!(rollback.after_state, original.before_state);
        assert_eq!(rollback.actor, "system");
        assert_eq!(rollback.confidence, 100.0);
        // Original row is untouched.
        assert_eq!(original.op, AuditOp::Merge);
        assert_eq!(original.confidence, 96.0);
        Ok(())
    }

    #[test]
    fn rollback_of_unknown_record_returns_false() -> anyhow::Result<()> {
        let store = temp_store();
        assert!(!store.rollback(Uuid::new_v4(), "nothing there")?);
        Ok(())
    }

    #[test]
    fn quality_summary_aggregates_decisions_and_ops() -> anyhow::Result<()> {
        let store = temp_store();
        let task_id = store.create_task("people", sample_payload(), TaskPriority::Medium, None)?;
        store.assign(task_id, "alice")?;
        store.complete(task_id, "alice", ReviewDecision::Merge, 90.0, None)?;
        store.record_metric("analysis_runtime_ms", 124.0, None)?;

        let summary = store.quality_summary(30)?;
        assert_eq!(summary.review_decisions["merge"].count, 1);
        assert_eq!(summary.review_decisions["merge"].mean_confidence, 90.0);
        assert_eq!(summary.operations["review_completed"].count, 1);
        Ok(())
    }

    #[test]
    fn stats_count_tasks_and_audits() -> anyhow::Result<()> {
        let store = temp_store();
        store.create_task("people", sample_payload(), TaskPriority::High, None)?;
        let assigned = store.create_task("people", sample_payload(), TaskPriority::Low, None)?;
        store.assign(assigned, "alice")?;

        let stats = store.stats()?;
        assert_eq!(stats.tasks_by_status.get("pending"), Some(&1));
        assert_eq!(stats.tasks_by_status.get("in_progress"), Some(&1));
        Ok(())
    }

    #[test]
    fn reopening_the_store_preserves_data() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("coalesce-audit-{}.redb", Uuid::new_v4()));
        let task_id = {
            let store = AuditStore::open(&path)?;
            store.create_task("people", sample_payload(), TaskPriority::High, None)?
        };
        let reopened = AuditStore::open(&path)?;
        let task = reopened.get_task(task_id)?.unwrap();
        assert_eq!(task.collection, "people");
        let _ = std::fs::remove_file(path);
        Ok(())
    }
}
