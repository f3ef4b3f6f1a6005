use serde::{Deserialize, Serialize};

/// Action recommended by an external analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiAction {
    Merge,
    Separate,
    NeedsHumanReview,
}

/// Risk grade attached to an external analyzer's recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiRisk {
    Low,
    Medium,
    High,
}

/// Second-opinion signal from the external analyzer adapter.
///
/// Optional everywhere it appears: the pipeline must behave identically when
/// no analyzer is configured or every call fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSignal {
    /// Confidence in the pair being the same entity, 0–100.
    pub confidence: f64,
    pub action: AiAction,
    pub risk: AiRisk,
    pub reasoning: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Contextual confidence contribution from the relationship graph,
/// independent of attribute similarity. Confidence is 0–1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSignal {
    pub confidence: f64,
    pub evidence: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_signal_serde_roundtrip() {
        let signal = AiSignal {
            confidence: 88.0,
            action: AiAction::NeedsHumanReview,
            risk: AiRisk::Medium,
            reasoning: "conflicting roles".to_string(),
            evidence: vec!["role mismatch".to_string()],
        };
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains("needs_human_review"));
        let back: AiSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action, AiAction::NeedsHumanReview);
        assert_eq!(back.risk, AiRisk::Medium);
    }
}
