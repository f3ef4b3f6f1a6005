use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use coalesce_match::ScoreSet;
use coalesce_types::{AiSignal, EntityType, GraphSignal, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    AutoMerge,
    Review,
    Low,
    Reject,
}

/// A scored candidate pair. Lives only in memory for the duration of one
/// analysis run; persisted review tasks carry a serialized payload instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairCandidate {
    pub entity_a: Record,
    pub entity_b: Record,
    pub entity_type: EntityType,
    pub scores: ScoreSet,
    pub confidence: f64,
    pub ai_signal: Option<AiSignal>,
    pub graph_signal: Option<GraphSignal>,
    pub classification: Classification,
}

impl PairCandidate {
    /// Order-independent identifier for the pair.
    pub fn pair_id(&self) -> String {
        let mut ids = [self.entity_a.id().to_string(), self.entity_b.id().to_string()];
        ids.sort();
        format!("{}|{}", ids[0], ids[1])
    }

    /// Serialized form stored inside review tasks.
    pub fn to_payload(&self) -> Value {
        json!({
            "entity_a": self.entity_a.to_value(),
            "entity_b": self.entity_b.to_value(),
            "entity_type": self.entity_type.slug(),
            "scores": self.scores,
            "confidence": self.confidence,
            "ai_signal": self.ai_signal,
            "graph_signal": self.graph_signal,
        })
    }
}

/// Confidence histogram over the buckets `{≥90, 70–90, 50–70, <50}`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub very_low: usize,
}

impl ConfidenceDistribution {
    pub fn record(&mut self, confidence: f64) {
        if confidence >= 90.0 {
            self.high += 1;
        } else if confidence >= 70.0 {
            self.medium += 1;
        } else if confidence >= 50.0 {
            self.low += 1;
        } else {
            self.very_low += 1;
        }
    }
}

/// Outcome of analyzing one collection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupResult {
    pub collection: String,
    pub total_records: usize,
    /// Records dropped before analysis (non-mapping input), with reasons
    /// logged as structured events.
    pub skipped_records: usize,
    pub candidate_pairs: usize,
    pub auto_merge: Vec<PairCandidate>,
    pub review: Vec<PairCandidate>,
    pub low: Vec<PairCandidate>,
    pub rejected: Vec<PairCandidate>,
    /// Merges actually executed (safety mode off only).
    pub auto_merged: usize,
    pub failed_merges: usize,
    pub review_tasks_created: usize,
    /// Pairs left unprocessed because a store write failed.
    pub failed_pairs: usize,
    pub confidence_distribution: ConfidenceDistribution,
    pub processing_ms: u64,
    pub cancelled: bool,
}

impl DedupResult {
    /// Pair ids per bucket, sorted, for order-insensitive comparisons.
    pub fn bucket_ids(&self) -> [Vec<String>; 4] {
        let collect = |pairs: &[PairCandidate]| {
            let mut ids: Vec<String> = pairs.iter().map(PairCandidate::pair_id).collect();
            ids.sort();
            ids
        };
        [
            collect(&self.auto_merge),
            collect(&self.review),
            collect(&self.low),
            collect(&self.rejected),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_buckets_match_thresholds() {
        let mut dist = ConfidenceDistribution::default();
        for confidence in [95.0, 90.0, 89.9, 70.0, 69.9, 50.0, 49.9, 0.0] {
            dist.record(confidence);
        }
        assert_eq!(dist.high, 2);
        assert_eq!(dist.medium, 2);
        assert_eq!(dist.low, 2);
        assert_eq!(dist.very_low, 2);
    }

    #[test]
    fn pair_id_is_order_independent() {
        let a = Record::from_value(&json!({"id": "p1"})).unwrap();
        let b = Record::from_value(&json!({"id": "p2"})).unwrap();
        let make = |x: &Record, y: &Record| PairCandidate {
            entity_a: x.clone(),
            entity_b: y.clone(),
            entity_type: EntityType::Person,
            scores: ScoreSet::default(),
            confidence: 0.0,
            ai_signal: None,
            graph_signal: None,
            classification: Classification::Low,
        };
        assert_eq!(make(&a, &b).pair_id(), make(&b, &a).pair_id());
    }
}
