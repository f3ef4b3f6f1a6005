use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Pipeline thresholds and switches.
///
/// These are the only keys the deduplication pipeline itself recognizes;
/// unknown keys are rejected at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    /// Minimum confidence for a pair to classify as auto-merge.
    pub auto_merge_threshold: f64,
    /// Minimum confidence for a pair to classify as human review.
    pub human_review_threshold: f64,
    /// Invoke the external analyzer for pairs at or above the review threshold.
    pub enable_external_analyzer: bool,
    /// Suppress automatic merges; high-confidence pairs become review tasks.
    pub safety_mode: bool,
    /// Token-bucket limit for external analyzer calls.
    pub max_external_rate_per_min: u32,
    /// Scoring batch granularity; cancellation is observed between batches.
    pub batch_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            auto_merge_threshold: 90.0,
            human_review_threshold: 70.0,
            enable_external_analyzer: true,
            safety_mode: true,
            max_external_rate_per_min: 10,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchingConfig {
    /// Confidence bonus applied when an organization acronym pattern is
    /// recognized. The upstream behavior saturates confidence quickly, so
    /// deployments may tune this down.
    pub acronym_bonus: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { acronym_bonus: 50.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// Confidence at or above which an unapproved merge may proceed.
    pub auto_approve_threshold: f64,
    /// When set, any safety flag blocks execution.
    pub enable_safety_checks: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 95.0,
            enable_safety_checks: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Minimum edge strength followed during cluster formation.
    pub clustering_threshold: f64,
    /// Edges weaker than this are not emitted at all.
    pub min_relationship_strength: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            clustering_threshold: 0.6,
            min_relationship_strength: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Path of the embedded audit database, relative to the working
    /// directory unless absolute.
    pub db_path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            db_path: "coalesce_audit.redb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// Endpoint of the external analyzer service. When unset, a no-op
    /// analyzer is used and every signal is absent.
    pub endpoint: Option<String>,
    /// Per-call timeout in seconds; a timeout yields no signal, never an error.
    pub timeout_secs: Option<u64>,
}

impl AnalyzerConfig {
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(30)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub dedup: DedupConfig,
    pub matching: MatchingConfig,
    pub merge: MergeConfig,
    pub graph: GraphConfig,
    pub audit: AuditConfig,
    pub analyzer: AnalyzerConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file, using defaults for any absent
    /// section. Unknown keys or malformed values are configuration errors.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("parsing config at {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use uuid::Uuid;

    use super::*;

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("coalesce-config-{}.toml", Uuid::new_v4()))
    }

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = AppConfig::default();
        assert_eq!(config.dedup.auto_merge_threshold, 90.0);
        assert_eq!(config.dedup.human_review_threshold, 70.0);
        assert!(config.dedup.safety_mode);
        assert!(config.dedup.enable_external_analyzer);
        assert_eq!(config.dedup.max_external_rate_per_min, 10);
        assert_eq!(config.dedup.batch_size, 100);
        assert_eq!(config.merge.auto_approve_threshold, 95.0);
        assert_eq!(config.graph.clustering_threshold, 0.6);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load_from(temp_path()).unwrap();
        assert_eq!(config.audit.db_path, "coalesce_audit.redb");
    }

    #[test]
    fn roundtrips_through_toml() -> Result<()> {
        let path = temp_path();
        let mut config = AppConfig::default();
        config.dedup.safety_mode = false;
        config.analyzer.endpoint = Some("http://localhost:9090/analyze".to_string());
        config.save_to(&path)?;
        let loaded = AppConfig::load_from(&path)?;
        assert!(!loaded.dedup.safety_mode);
        assert_eq!(
            loaded.analyzer.endpoint.as_deref(),
            Some("http://localhost:9090/analyze")
        );
        let _ = fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let path = temp_path();
        fs::write(&path, "[dedup]\nauto_merge_threshold = 90.0\nturbo_mode = true\n").unwrap();
        let result = AppConfig::load_from(&path);
        assert!(result.is_err());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let path = temp_path();
        fs::write(&path, "[dedup]\nauto_merge_threshold = \"very high\"\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
        let _ = fs::remove_file(path);
    }
}
