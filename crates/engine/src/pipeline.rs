//! Pipeline orchestration: candidate generation → scoring → classification
//! → persistence routing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use coalesce_analyzer::ExternalAnalyzer;
use coalesce_audit::{AuditStore, TaskPriority};
use coalesce_config::AppConfig;
use coalesce_graph::{entity_id_for, GraphAnalyzer, GraphSettings};
use coalesce_match::{EntityProcessor, SimilarityScorer};
use coalesce_merge::{MergeEngine, MergeEngineStats, MergeOptions};
use coalesce_types::{AiAction, AiSignal, EntityType, Record};

use crate::error::PipelineError;
use crate::result::{Classification, DedupResult, PairCandidate};

/// Concurrently scored pairs per batch. Scoring is CPU-light; the
/// concurrency mainly overlaps analyzer I/O.
const SCORING_CONCURRENCY: usize = 16;

/// Consecutive store failures after which the run aborts.
const MAX_CONSECUTIVE_STORE_FAILURES: u32 = 5;

/// Cooperative cancellation handle shared with callers.
///
/// Once cancelled, the pipeline stops issuing new pairs, awaits in-flight
/// workers, and returns a partial result marked `cancelled`.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Runtime counters exposed through the driver's `stats` surface.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineStats {
    pub comparisons: u64,
    pub analyzer_calls: u64,
    pub merge: MergeEngineStats,
}

/// The deduplication pipeline.
///
/// Construction owns its collaborators: the audit store handle, the merge
/// engine, and the analyzer. Configuration is read-only afterwards; all
/// shared state is behind the store's own transactional API.
pub struct DedupPipeline {
    config: coalesce_config::DedupConfig,
    acronym_bonus: f64,
    graph_settings: GraphSettings,
    scorer: SimilarityScorer,
    analyzer: Arc<dyn ExternalAnalyzer>,
    store: Arc<AuditStore>,
    merge: MergeEngine,
    cancel: CancelToken,
    comparisons: AtomicU64,
    analyzer_calls: AtomicU64,
}

impl std::fmt::Debug for DedupPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupPipeline").finish_non_exhaustive()
    }
}

impl DedupPipeline {
    pub fn new(
        config: &AppConfig,
        store: Arc<AuditStore>,
        analyzer: Arc<dyn ExternalAnalyzer>,
    ) -> Result<Self, PipelineError> {
        let dedup = &config.dedup;
        for (name, value) in [
            ("auto_merge_threshold", dedup.auto_merge_threshold),
            ("human_review_threshold", dedup.human_review_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(PipelineError::Config(format!("{name} must be within 0..=100")));
            }
        }
        if dedup.human_review_threshold > dedup.auto_merge_threshold {
            return Err(PipelineError::Config(
                "human_review_threshold must not exceed auto_merge_threshold".to_string(),
            ));
        }
        if dedup.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be positive".to_string()));
        }

        let merge = MergeEngine::new(
            store.clone(),
            MergeOptions {
                auto_approve_threshold: config.merge.auto_approve_threshold,
                enable_safety_checks: config.merge.enable_safety_checks,
            },
        );

        Ok(Self {
            config: dedup.clone(),
            acronym_bonus: config.matching.acronym_bonus,
            graph_settings: GraphSettings {
                clustering_threshold: config.graph.clustering_threshold,
                min_relationship_strength: config.graph.min_relationship_strength,
            },
            scorer: SimilarityScorer::new(),
            analyzer,
            store,
            merge,
            cancel: CancelToken::new(),
            comparisons: AtomicU64::new(0),
            analyzer_calls: AtomicU64::new(0),
        })
    }

    /// Handle for cooperative cancellation of in-progress analyses.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<AuditStore> {
        &self.store
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            comparisons: self.comparisons.load(Ordering::Relaxed),
            analyzer_calls: self.analyzer_calls.load(Ordering::Relaxed),
            merge: self.merge.stats(),
        }
    }

    /// Analyze one collection for duplicate pairs.
    pub async fn analyze(
        &self,
        collection: &str,
        raw_records: &[Value],
        enable_external: bool,
    ) -> Result<DedupResult, PipelineError> {
        let (records, skipped) = coerce_records(collection, raw_records);
        let mut collections = BTreeMap::new();
        collections.insert(collection.to_string(), records.clone());
        let mut graph = GraphAnalyzer::new(self.graph_settings);
        graph.build(&collections);

        self.analyze_collection(collection, &records, skipped, raw_records.len(), &graph, enable_external)
            .await
    }

    /// Analyze every collection, sharing one relationship graph across all
    /// of them. Empty collections are skipped.
    pub async fn analyze_all(
        &self,
        raw_collections: &BTreeMap<String, Vec<Value>>,
        enable_external: bool,
    ) -> Result<BTreeMap<String, DedupResult>, PipelineError> {
        let mut coerced: BTreeMap<String, (Vec<Record>, usize, usize)> = BTreeMap::new();
        let mut graph_input = BTreeMap::new();
        for (collection, raw) in raw_collections {
            let (records, skipped) = coerce_records(collection, raw);
            graph_input.insert(collection.clone(), records.clone());
            coerced.insert(collection.clone(), (records, skipped, raw.len()));
        }
        let mut graph = GraphAnalyzer::new(self.graph_settings);
        graph.build(&graph_input);

        let mut results = BTreeMap::new();
        for (collection, (records, skipped, total)) in &coerced {
            if records.is_empty() {
                tracing::info!(collection, "skipping empty collection");
                continue;
            }
            let result = self
                .analyze_collection(collection, records, *skipped, *total, &graph, enable_external)
                .await?;
            results.insert(collection.clone(), result);
        }

        let pairs: usize = results.values().map(|r| r.candidate_pairs).sum();
        tracing::info!(
            collections = results.len(),
            candidate_pairs = pairs,
            "multi-collection analysis complete"
        );
        Ok(results)
    }

    async fn analyze_collection(
        &self,
        collection: &str,
        records: &[Record],
        skipped: usize,
        total: usize,
        graph: &GraphAnalyzer,
        enable_external: bool,
    ) -> Result<DedupResult, PipelineError> {
        let started = Instant::now();
        let entity_type = EntityType::for_collection(collection);
        let processor = EntityProcessor::new(entity_type).with_acronym_bonus(self.acronym_bonus);

        let mut result = DedupResult {
            collection: collection.to_string(),
            total_records: total,
            skipped_records: skipped,
            ..DedupResult::default()
        };

        tracing::info!(
            collection,
            records = records.len(),
            entity_type = entity_type.slug(),
            "analysis started"
        );

        // Candidate generation: O(n²) prescreen over i < j.
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for i in 0..records.len() {
            if self.cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            for j in (i + 1)..records.len() {
                if processor.is_candidate(&records[i], &records[j]) {
                    pairs.push((i, j));
                }
            }
        }
        result.candidate_pairs = pairs.len();
        tracing::info!(collection, candidates = pairs.len(), "candidate generation complete");

        // Scoring in batches; cancellation is observed between batches and
        // in-flight work is always awaited.
        let mut scored: Vec<PairCandidate> = Vec::with_capacity(pairs.len());
        for batch in pairs.chunks(self.config.batch_size) {
            if self.cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let futures_iter = batch.iter().map(|&(i, j)| {
                self.score_pair(collection, &records[i], &records[j], &processor, graph, enable_external)
            });
            let mut batch_scored = stream::iter(futures_iter)
                .buffered(SCORING_CONCURRENCY)
                .collect::<Vec<_>>()
                .await;
            scored.append(&mut batch_scored);
        }
        self.comparisons.fetch_add(scored.len() as u64, Ordering::Relaxed);

        for pair in scored {
            result.confidence_distribution.record(pair.confidence);
            match pair.classification {
                Classification::AutoMerge => result.auto_merge.push(pair),
                Classification::Review => result.review.push(pair),
                Classification::Low => result.low.push(pair),
                Classification::Reject => result.rejected.push(pair),
            }
        }

        self.route_outcomes(collection, &mut result)?;

        result.processing_ms = started.elapsed().as_millis() as u64;
        if let Err(err) = self.store.record_metric(
            "analysis_processing_ms",
            result.processing_ms as f64,
            Some(json!({"collection": collection})),
        ) {
            tracing::warn!(error = %err, "failed to record analysis metric");
        }

        tracing::info!(
            collection,
            auto_merge = result.auto_merge.len(),
            review = result.review.len(),
            low = result.low.len(),
            cancelled = result.cancelled,
            elapsed_ms = result.processing_ms,
            "analysis complete"
        );
        Ok(result)
    }

    async fn score_pair(
        &self,
        collection: &str,
        a: &Record,
        b: &Record,
        processor: &EntityProcessor,
        graph: &GraphAnalyzer,
        enable_external: bool,
    ) -> PairCandidate {
        let scores = self.scorer.score(a, b, processor.comparison_fields());
        let mut confidence = processor.confidence(&scores, a, b);
        let mut ai_signal = None;

        if enable_external
            && self.config.enable_external_analyzer
            && confidence >= self.config.human_review_threshold
        {
            self.analyzer_calls.fetch_add(1, Ordering::Relaxed);
            if let Some(signal) = self.analyzer.analyze(a, b, processor.entity_type()).await {
                confidence = 0.4 * confidence + 0.6 * signal.confidence;
                ai_signal = Some(signal);
            }
        }

        let graph_signal = graph.pair_signal(&entity_id_for(collection, a), &entity_id_for(collection, b));
        let classification = self.classify(confidence, ai_signal.as_ref());

        PairCandidate {
            entity_a: a.clone(),
            entity_b: b.clone(),
            entity_type: processor.entity_type(),
            scores,
            confidence,
            ai_signal,
            graph_signal,
            classification,
        }
    }

    fn classify(&self, confidence: f64, ai_signal: Option<&AiSignal>) -> Classification {
        if confidence >= self.config.auto_merge_threshold {
            Classification::AutoMerge
        } else if confidence >= self.config.human_review_threshold {
            Classification::Review
        } else if ai_signal.is_some_and(|s| s.action == AiAction::Separate) {
            Classification::Reject
        } else {
            Classification::Low
        }
    }

    /// Route classified pairs: auto-merge pairs execute (or become
    /// high-priority review tasks in safety mode); review pairs always
    /// become tasks. Store failures leave the pair unprocessed; repeated
    /// failure aborts the run.
    fn route_outcomes(&self, collection: &str, result: &mut DedupResult) -> Result<(), PipelineError> {
        let mut consecutive_failures = 0u32;
        let mut tasks_created = 0usize;
        let mut auto_merged = 0usize;
        let mut failed_merges = 0usize;
        let mut failed_pairs = 0usize;

        for pair in &result.auto_merge {
            if self.config.safety_mode {
                match self.store.create_task(
                    collection,
                    pair.to_payload(),
                    TaskPriority::High,
                    pair.ai_signal.clone(),
                ) {
                    Ok(_) => {
                        tasks_created += 1;
                        consecutive_failures = 0;
                    }
                    Err(err) => {
                        failed_pairs += 1;
                        consecutive_failures += 1;
                        tracing::warn!(error = %err, pair = pair.pair_id(), "task creation failed");
                        if consecutive_failures >= MAX_CONSECUTIVE_STORE_FAILURES {
                            return Err(PipelineError::Store {
                                consecutive: consecutive_failures,
                                message: err.to_string(),
                            });
                        }
                    }
                }
            } else {
                let mut proposal = self.merge.create_proposal(
                    pair.entity_a.clone(),
                    pair.entity_b.clone(),
                    pair.confidence,
                    serde_json::to_value(&pair.scores).unwrap_or(Value::Null),
                    pair.entity_type,
                    pair.ai_signal.clone(),
                );
                let merge_result = self.merge.execute(&mut proposal, collection, "system", true);
                if merge_result.success {
                    auto_merged += 1;
                    consecutive_failures = 0;
                } else if merge_result
                    .errors
                    .iter()
                    .any(|e| e.starts_with("audit write failed"))
                {
                    failed_pairs += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_STORE_FAILURES {
                        return Err(PipelineError::Store {
                            consecutive: consecutive_failures,
                            message: merge_result.errors.join("; "),
                        });
                    }
                } else {
                    failed_merges += 1;
                    tracing::warn!(
                        pair = pair.pair_id(),
                        errors = ?merge_result.errors,
                        "automatic merge rejected"
                    );
                }
            }
        }

        for pair in &result.review {
            let priority = if pair.confidence >= 80.0 {
                TaskPriority::Medium
            } else {
                TaskPriority::Low
            };
            match self
                .store
                .create_task(collection, pair.to_payload(), priority, pair.ai_signal.clone())
            {
                Ok(_) => {
                    tasks_created += 1;
                    consecutive_failures = 0;
                }
                Err(err) => {
                    failed_pairs += 1;
                    consecutive_failures += 1;
                    tracing::warn!(error = %err, pair = pair.pair_id(), "task creation failed");
                    if consecutive_failures >= MAX_CONSECUTIVE_STORE_FAILURES {
                        return Err(PipelineError::Store {
                            consecutive: consecutive_failures,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        result.review_tasks_created = tasks_created;
        result.auto_merged = auto_merged;
        result.failed_merges = failed_merges;
        result.failed_pairs = failed_pairs;
        Ok(())
    }
}

fn coerce_records(collection: &str, raw: &[Value]) -> (Vec<Record>, usize) {
    let mut records = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;
    for (index, value) in raw.iter().enumerate() {
        match Record::from_value(value) {
            Some(record) => records.push(record),
            None => {
                skipped += 1;
                tracing::warn!(collection, index, "skipping non-mapping record");
            }
        }
    }
    (records, skipped)
}
