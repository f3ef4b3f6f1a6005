//! Multi-metric string similarity with domain-aware variants.
//!
//! Every metric is bounded to [0, 100] and never errors: missing or empty
//! values score zero. Metric values are symmetric in their arguments.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use coalesce_types::Record;

use crate::normalize;

/// Per-field metric breakdown plus the weighted composite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub metrics: BTreeMap<String, f64>,
    /// Weighted mean of the metrics, per field class. 0 when absent.
    pub composite: f64,
    /// Both sides supplied a non-empty value for this field.
    pub present: bool,
}

/// Scores for every compared field plus the overall weighted score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreSet {
    pub fields: BTreeMap<String, SimilarityScore>,
    /// Weighted mean of field composites over the fields present on both
    /// sides; absent fields carry no weight.
    pub overall: f64,
}

impl ScoreSet {
    pub fn composite(&self, field: &str) -> f64 {
        self.fields.get(field).map(|s| s.composite).unwrap_or(0.0)
    }

    pub fn metric(&self, field: &str, metric: &str) -> f64 {
        self.fields
            .get(field)
            .and_then(|s| s.metrics.get(metric))
            .copied()
            .unwrap_or(0.0)
    }

    /// Whether any of the given fields matched exactly.
    pub fn has_exact(&self, fields: &[&str]) -> bool {
        fields.iter().any(|f| self.metric(f, "exact") == 100.0)
    }

    pub fn max_composite(&self, fields: &[&str]) -> f64 {
        fields.iter().map(|f| self.composite(f)).fold(0.0, f64::max)
    }
}

// ── field lookup ──────────────────────────────────────────────────────────────

/// Alternate keys commonly used by source collections for the same logical
/// field, tried in order.
const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("organization_name", &["organization_name", "name"]),
    ("organization", &["organization", "org", "company"]),
    ("name", &["name", "full_name"]),
    ("date", &["date", "date_of_event"]),
];

/// String form of a logical field, resolving common key aliases.
pub fn field_text(record: &Record, field: &str) -> String {
    if let Some((_, aliases)) = FIELD_ALIASES.iter().find(|(key, _)| *key == field) {
        for key in *aliases {
            let text = record.text(key);
            if !text.is_empty() {
                return text;
            }
        }
        return String::new();
    }
    record.text(field)
}

// ── field classes and weights ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    Name,
    Organization,
    Location,
    Generic,
}

fn classify(field: &str) -> FieldClass {
    let field = field.to_lowercase();
    if field.contains("organization") || field.contains("organisation") || field.contains("company") {
        FieldClass::Organization
    } else if field.contains("name") {
        FieldClass::Name
    } else if ["address", "location", "place", "venue"].iter().any(|p| field.contains(p)) {
        FieldClass::Location
    } else {
        FieldClass::Generic
    }
}

/// Field importance patterns for the overall score, first match wins.
const OVERALL_FIELD_WEIGHTS: &[(&str, f64)] = &[
    ("organization_name", 0.40),
    ("full_name", 0.40),
    ("name", 0.40),
    ("email", 0.30),
    ("phone", 0.20),
    ("organization", 0.20),
    ("address", 0.15),
    ("location", 0.20),
    ("description", 0.10),
    ("notes", 0.05),
];

const DEFAULT_FIELD_WEIGHT: f64 = 0.10;

fn overall_weight(field: &str) -> f64 {
    let field = field.to_lowercase();
    OVERALL_FIELD_WEIGHTS
        .iter()
        .find(|(pattern, _)| field.contains(pattern))
        .map(|(_, weight)| *weight)
        .unwrap_or(DEFAULT_FIELD_WEIGHT)
}

// ── scorer ────────────────────────────────────────────────────────────────────

/// Stateless multi-metric scorer. Construct once and share freely; scoring
/// only reads its inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityScorer;

impl SimilarityScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score every requested field between two records.
    ///
    /// Fields missing or empty on either side yield a zero score entry and
    /// are excluded from the overall weighting.
    pub fn score(&self, a: &Record, b: &Record, fields: &[&str]) -> ScoreSet {
        let mut out = BTreeMap::new();
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for &field in fields {
            let value_a = field_text(a, field).to_lowercase();
            let value_b = field_text(b, field).to_lowercase();
            if value_a.is_empty() || value_b.is_empty() {
                out.insert(field.to_string(), SimilarityScore::default());
                continue;
            }

            let score = field_scores(&value_a, &value_b, classify(field));
            let weight = overall_weight(field);
            weighted_sum += score.composite * weight;
            total_weight += weight;
            out.insert(field.to_string(), score);
        }

        let overall = if total_weight > 0.0 { weighted_sum / total_weight } else { 0.0 };
        ScoreSet { fields: out, overall }
    }
}

fn field_scores(value_a: &str, value_b: &str, class: FieldClass) -> SimilarityScore {
    let mut metrics = BTreeMap::new();

    metrics.insert("exact".to_string(), if value_a == value_b { 100.0 } else { 0.0 });
    metrics.insert("sequence".to_string(), sequence_ratio(value_a, value_b) * 100.0);
    metrics.insert("partial".to_string(), partial_ratio(value_a, value_b) * 100.0);

    let tokens_a: BTreeSet<String> = normalize::tokens(value_a).into_iter().collect();
    let tokens_b: BTreeSet<String> = normalize::tokens(value_b).into_iter().collect();
    metrics.insert(
        "token_set".to_string(),
        normalize::token_jaccard(&tokens_a, &tokens_b) * 100.0,
    );

    let sorted_a = sorted_token_join(value_a);
    let sorted_b = sorted_token_join(value_b);
    metrics.insert("token_sort".to_string(), sequence_ratio(&sorted_a, &sorted_b) * 100.0);

    let soundex_a = simple_soundex(value_a);
    let soundex_b = simple_soundex(value_b);
    metrics.insert(
        "soundex".to_string(),
        if !soundex_a.is_empty() && soundex_a == soundex_b { 100.0 } else { 0.0 },
    );

    match class {
        FieldClass::Name => {
            metrics.insert("name_specific".to_string(), name_specific(value_a, value_b));
        }
        FieldClass::Organization => {
            metrics.insert(
                "organization_specific".to_string(),
                organization_specific(value_a, value_b),
            );
        }
        FieldClass::Location => {
            metrics.insert("location_specific".to_string(), location_specific(value_a, value_b));
        }
        FieldClass::Generic => {}
    }

    let composite = composite_for(&metrics, class);
    SimilarityScore {
        metrics,
        composite,
        present: true,
    }
}

fn composite_for(metrics: &BTreeMap<String, f64>, class: FieldClass) -> f64 {
    let weights: &[(&str, f64)] = match class {
        FieldClass::Name => &[
            ("exact", 0.30),
            ("name_specific", 0.30),
            ("token_set", 0.20),
            ("soundex", 0.10),
            ("sequence", 0.10),
        ],
        FieldClass::Organization => &[
            ("exact", 0.25),
            ("organization_specific", 0.35),
            ("token_set", 0.25),
            ("sequence", 0.15),
        ],
        FieldClass::Location | FieldClass::Generic => &[
            ("exact", 0.20),
            ("token_set", 0.30),
            ("sequence", 0.30),
            ("partial", 0.20),
        ],
    };

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for (metric, weight) in weights {
        if let Some(value) = metrics.get(*metric) {
            weighted_sum += value * weight;
            total_weight += weight;
        }
    }
    if total_weight > 0.0 { weighted_sum / total_weight } else { 0.0 }
}

// ── base metrics ──────────────────────────────────────────────────────────────

/// Sequence similarity in [0, 1]: twice the total matched characters over
/// the combined length, where matches are found by recursively taking the
/// longest common contiguous run.
fn sequence_ratio(a: &str, b: &str) -> f64 {
    let chars_a: Vec<char> = a.chars().collect();
    let chars_b: Vec<char> = b.chars().collect();
    if chars_a.is_empty() || chars_b.is_empty() {
        return 0.0;
    }
    let matched = matching_chars(&chars_a, &chars_b);
    2.0 * matched as f64 / (chars_a.len() + chars_b.len()) as f64
}

/// Best substring overlap in [0, 1]: the single longest common run, scaled
/// like [`sequence_ratio`].
fn partial_ratio(a: &str, b: &str) -> f64 {
    let chars_a: Vec<char> = a.chars().collect();
    let chars_b: Vec<char> = b.chars().collect();
    if chars_a.is_empty() || chars_b.is_empty() {
        return 0.0;
    }
    let (_, _, size) = longest_common_run(&chars_a, &chars_b);
    2.0 * size as f64 / (chars_a.len() + chars_b.len()) as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (start_a, start_b, size) = longest_common_run(a, b);
    if size == 0 {
        return 0;
    }
    size + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + size..], &b[start_b + size..])
}

fn longest_common_run(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        let mut current = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                let run = prev[j] + 1;
                current[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        prev = current;
    }
    best
}

fn sorted_token_join(value: &str) -> String {
    let mut parts = normalize::tokens(value);
    parts.sort();
    parts.join(" ")
}

/// Four-character soundex approximation: leading letter plus consonant
/// codes, zero-padded.
fn simple_soundex(value: &str) -> String {
    let letters: Vec<char> = value
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphabetic)
        .collect();
    let Some(&first) = letters.first() else {
        return String::new();
    };
    let mut code = String::new();
    code.push(first);
    for &c in &letters[1..] {
        let digit = match c {
            'b' | 'f' | 'p' | 'v' => '1',
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => '2',
            'd' | 't' => '3',
            'l' => '4',
            'm' | 'n' => '5',
            'r' => '6',
            _ => continue,
        };
        code.push(digit);
        if code.len() == 4 {
            break;
        }
    }
    while code.len() < 4 {
        code.push('0');
    }
    code
}

// ── field-specialized metrics ─────────────────────────────────────────────────

fn token_set_of(value: &str) -> BTreeSet<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn name_specific(value_a: &str, value_b: &str) -> f64 {
    let norm_a = normalize::normalize_name(value_a);
    let norm_b = normalize::normalize_name(value_b);
    if norm_a.is_empty() || norm_b.is_empty() {
        return 0.0;
    }
    if norm_a == norm_b {
        return 100.0;
    }
    if normalize::are_name_variants(&norm_a, &norm_b) {
        return 95.0;
    }
    normalize::token_jaccard(&token_set_of(&norm_a), &token_set_of(&norm_b)) * 100.0
}

fn organization_specific(value_a: &str, value_b: &str) -> f64 {
    let norm_a = normalize::normalize_organization(value_a);
    let norm_b = normalize::normalize_organization(value_b);
    if norm_a.is_empty() || norm_b.is_empty() {
        return 0.0;
    }
    if norm_a == norm_b {
        return 100.0;
    }
    if normalize::is_acronym_pair(&norm_a, &norm_b) {
        return 90.0;
    }
    normalize::token_jaccard(&token_set_of(&norm_a), &token_set_of(&norm_b)) * 100.0
}

fn location_specific(value_a: &str, value_b: &str) -> f64 {
    let norm_a = normalize::normalize_location(value_a);
    let norm_b = normalize::normalize_location(value_b);
    if norm_a.is_empty() || norm_b.is_empty() {
        return 0.0;
    }
    if norm_a == norm_b {
        return 100.0;
    }
    normalize::token_jaccard(&token_set_of(&norm_a), &token_set_of(&norm_b)) * 100.0
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(&value).expect("object")
    }

    #[test]
    fn identical_values_score_one_hundred() {
        let a = record(json!({"name": "Anthony Smith"}));
        let scores = SimilarityScorer::new().score(&a, &a, &["name"]);
        let name = &scores.fields["name"];
        assert_eq!(name.metrics["exact"], 100.0);
        assert_eq!(name.composite, 100.0);
        assert_eq!(scores.overall, 100.0);
    }

    #[test]
    fn empty_values_score_zero_without_error() {
        let a = record(json!({"name": ""}));
        let b = record(json!({"notes": "something"}));
        let scores = SimilarityScorer::new().score(&a, &b, &["name", "notes"]);
        assert_eq!(scores.composite("name"), 0.0);
        assert_eq!(scores.composite("notes"), 0.0);
        assert_eq!(scores.overall, 0.0);
        assert!(!scores.fields["name"].present);
    }

    #[test]
    fn all_metrics_stay_bounded() {
        let a = record(json!({"name": "Dr Robert Johnson III", "notes": "long piece of text"}));
        let b = record(json!({"name": "Bob Johnson", "notes": "short"}));
        let scores = SimilarityScorer::new().score(&a, &b, &["name", "notes"]);
        for score in scores.fields.values() {
            assert!((0.0..=100.0).contains(&score.composite));
            for value in score.metrics.values() {
                assert!((0.0..=100.0).contains(value), "metric out of range: {value}");
            }
        }
        assert!((0.0..=100.0).contains(&scores.overall));
    }

    #[test]
    fn metrics_are_symmetric() {
        let a = record(json!({"name": "Anthony Smith", "organization": "Swanage Town Council"}));
        let b = record(json!({"name": "Tony Smith", "organization": "STC"}));
        let fields = ["name", "organization"];
        let forward = SimilarityScorer::new().score(&a, &b, &fields);
        let reverse = SimilarityScorer::new().score(&b, &a, &fields);
        for field in fields {
            assert_eq!(forward.composite(field), reverse.composite(field));
        }
        assert_eq!(forward.overall, reverse.overall);
    }

    #[test]
    fn nickname_pairs_score_ninety_five_on_name_metric() {
        let a = record(json!({"name": "Anthony Smith"}));
        let b = record(json!({"name": "Tony Smith"}));
        let scores = SimilarityScorer::new().score(&a, &b, &["name"]);
        assert_eq!(scores.metric("name", "name_specific"), 95.0);
    }

    #[test]
    fn acronyms_score_ninety_on_organization_metric() {
        let a = record(json!({"organization": "Swanage Town Council"}));
        let b = record(json!({"organization": "STC"}));
        let scores = SimilarityScorer::new().score(&a, &b, &["organization"]);
        assert_eq!(scores.metric("organization", "organization_specific"), 90.0);
    }

    #[test]
    fn expanded_abbreviations_match_exactly_on_organization_metric() {
        let a = record(json!({"organization": "Johnson Corporation"}));
        let b = record(json!({"organization": "Johnson Corp"}));
        let scores = SimilarityScorer::new().score(&a, &b, &["organization"]);
        assert_eq!(scores.metric("organization", "organization_specific"), 100.0);
    }

    #[test]
    fn token_set_ignores_ordering_and_punctuation() {
        let a = record(json!({"location": "Town Hall, Swanage"}));
        let b = record(json!({"location": "Swanage Town Hall"}));
        let scores = SimilarityScorer::new().score(&a, &b, &["location"]);
        assert_eq!(scores.metric("location", "token_set"), 100.0);
        assert_eq!(scores.metric("location", "location_specific"), 100.0);
    }

    #[test]
    fn soundex_matches_homophones() {
        let a = record(json!({"name": "smith"}));
        let b = record(json!({"name": "smyth"}));
        let scores = SimilarityScorer::new().score(&a, &b, &["name"]);
        assert_eq!(scores.metric("name", "soundex"), 100.0);
    }

    #[test]
    fn list_values_score_deterministically() {
        let a = record(json!({"people": ["Tony Smith", "Jane Doe"]}));
        let b = record(json!({"people": ["Jane Doe", "Tony Smith"]}));
        let scores = SimilarityScorer::new().score(&a, &b, &["people"]);
        assert_eq!(scores.metric("people", "exact"), 100.0);
    }

    #[test]
    fn organization_name_falls_back_to_bare_name_key() {
        let a = record(json!({"name": "Johnson Corporation"}));
        let b = record(json!({"name": "Johnson Corp"}));
        let scores = SimilarityScorer::new().score(&a, &b, &["organization_name"]);
        assert_eq!(
            scores.metric("organization_name", "organization_specific"),
            100.0
        );
    }

    #[test]
    fn dominating_metrics_never_lower_the_composite() {
        // A pair that matches on strictly more metrics scores at least as
        // high a composite.
        let base_a = record(json!({"notes": "annual budget review"}));
        let base_b = record(json!({"notes": "quarterly staffing plan"}));
        let close_b = record(json!({"notes": "annual budget reviews"}));
        let scorer = SimilarityScorer::new();
        let distant = scorer.score(&base_a, &base_b, &["notes"]);
        let close = scorer.score(&base_a, &close_b, &["notes"]);
        assert!(close.composite("notes") >= distant.composite("notes"));
    }
}
