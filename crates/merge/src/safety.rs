//! Safety suite run at proposal construction.
//!
//! Flags are potentially blocking; risk factors are informational only.

use std::collections::BTreeSet;

use coalesce_match::dates::parse_flexible_date;
use coalesce_match::normalize;
use coalesce_types::{AiAction, AiRisk, AiSignal, EntityType, Record};

use crate::proposal::SafetyFlag;

/// Identifier fields compared as sets; disjoint non-empty sets are a
/// conflict, any overlap is not.
const IDENTIFIER_FIELDS: &[&str] = &["email", "phone", "website", "url", "external_id"];

const RELATIONSHIP_FIELDS: &[&str] = &["organization", "company", "affiliation"];

const GENERIC_NAME_MARKERS: &[&str] = &["admin", "test", "user", "unknown", "n/a", "null"];

/// One side holding this many times more populated fields than the other
/// trips the data-disparity flag.
const DATA_DISPARITY_RATIO: f64 = 3.0;

pub fn run_safety_checks(
    primary: &Record,
    secondary: &Record,
    entity_type: EntityType,
) -> Vec<SafetyFlag> {
    let mut flags = Vec::new();
    if conflicting_identifiers(primary, secondary) {
        flags.push(SafetyFlag::ConflictingIdentifiers);
    }
    if temporal_conflicts(primary, secondary, entity_type) {
        flags.push(SafetyFlag::TemporalConflicts);
    }
    if relationship_conflicts(primary, secondary) {
        flags.push(SafetyFlag::RelationshipConflicts);
    }
    if data_disparity(primary, secondary) {
        flags.push(SafetyFlag::DataDisparity);
    }
    if suspicious_patterns(primary, secondary) {
        flags.push(SafetyFlag::SuspiciousPatterns);
    }
    flags
}

fn conflicting_identifiers(primary: &Record, secondary: &Record) -> bool {
    IDENTIFIER_FIELDS.iter().any(|field| {
        let set_a = identifier_set(primary, field);
        let set_b = identifier_set(secondary, field);
        !set_a.is_empty() && !set_b.is_empty() && set_a.is_disjoint(&set_b)
    })
}

/// Identifier values as a normalized set, so formatting variants of the
/// same phone number or website never read as a conflict.
fn identifier_set(record: &Record, field: &str) -> BTreeSet<String> {
    record
        .value_set(field)
        .into_iter()
        .map(|value| match field {
            "phone" => {
                let normalized = normalize::normalize_phone(&value);
                if normalized.is_empty() { value } else { normalized }
            }
            "website" => normalize::normalize_website(&value),
            "url" => normalize::normalize_url(&value),
            _ => value,
        })
        .collect()
}

/// The same logical date field parsing to different instants on an
/// event-like record.
fn temporal_conflicts(primary: &Record, secondary: &Record, entity_type: EntityType) -> bool {
    primary.fields().keys().any(|key| {
        let lower = key.to_lowercase();
        if !lower.contains("date") {
            return false;
        }
        if entity_type != EntityType::EventPlace && !lower.contains("event") {
            return false;
        }
        let (Some(date_a), Some(date_b)) = (
            parse_flexible_date(&primary.text(key)),
            parse_flexible_date(&secondary.text(key)),
        ) else {
            return false;
        };
        date_a != date_b
    })
}

fn relationship_conflicts(primary: &Record, secondary: &Record) -> bool {
    RELATIONSHIP_FIELDS.iter().any(|field| {
        let set_a = primary.value_set(field);
        let set_b = secondary.value_set(field);
        !set_a.is_empty() && !set_b.is_empty() && set_a.is_disjoint(&set_b)
    })
}

fn data_disparity(primary: &Record, secondary: &Record) -> bool {
    let count_a = primary.populated_field_count();
    let count_b = secondary.populated_field_count();
    if count_a == 0 || count_b == 0 {
        return false;
    }
    let ratio = count_a.max(count_b) as f64 / count_a.min(count_b) as f64;
    ratio > DATA_DISPARITY_RATIO
}

fn suspicious_patterns(primary: &Record, secondary: &Record) -> bool {
    [primary, secondary].iter().any(|record| {
        let name = format!(
            "{} {}",
            record.text("name").to_lowercase(),
            record.text("organization_name").to_lowercase()
        );
        GENERIC_NAME_MARKERS.iter().any(|marker| name.contains(marker))
    })
}

/// Informational risk factors; none of these block on their own.
pub fn identify_risk_factors(
    confidence: f64,
    ai_signal: Option<&AiSignal>,
    safety_flags: &[SafetyFlag],
) -> Vec<String> {
    let mut risks = Vec::new();
    if confidence < 80.0 {
        risks.push("low_confidence".to_string());
    }
    if let Some(signal) = ai_signal {
        if signal.action == AiAction::NeedsHumanReview {
            risks.push("ai_needs_review".to_string());
        }
        if signal.risk == AiRisk::High {
            risks.push("ai_high_risk".to_string());
        }
    }
    if !safety_flags.is_empty() {
        risks.push("safety_flags".to_string());
    }
    risks
}
